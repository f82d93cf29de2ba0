//! Per-partition secure erase with discard fallbacks.

#![allow(missing_docs)]

use std::io;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::logger::session::{LogHandle, RecoveryEvent};
use crate::platform::block::{BlockDevice, ByteRange, DiscardTarget};

/// Opens partitions by name.
pub trait PartitionOpener: Send + Sync {
    fn open(&self, name: &str) -> io::Result<Box<dyn DiscardTarget>>;
}

/// Resolves a manifest entry against a by-name directory; absolute paths are
/// used as-is.
#[derive(Debug, Clone)]
pub struct ByNameOpener {
    dir: PathBuf,
}

impl ByNameOpener {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> PathBuf {
        let path = PathBuf::from(name);
        if path.is_absolute() {
            path
        } else {
            self.dir.join(name)
        }
    }
}

impl PartitionOpener for ByNameOpener {
    fn open(&self, name: &str) -> io::Result<Box<dyn DiscardTarget>> {
        Ok(Box::new(BlockDevice::open(&self.resolve(name))?))
    }
}

/// Which primitive finished the wipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeMethod {
    SecureDiscard,
    Discard,
    ZeroOut,
}

impl WipeMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SecureDiscard => "secdiscard",
            Self::Discard => "discard",
            Self::ZeroOut => "zeroout",
        }
    }
}

/// Erase the whole of `target`.
///
/// Secure discard first; if the device refuses, a plain discard when it is
/// known to read back zeroes, otherwise an explicit zero fill.
pub fn secure_wipe_partition(target: &mut dyn DiscardTarget, name: &str, log: &LogHandle) -> bool {
    let outcome = wipe_with_fallbacks(target, name, log);
    let (method, ok) = match outcome {
        Ok(method) => {
            log.info("  Done");
            (method.as_str(), true)
        }
        Err(method) => (method.map_or("none", WipeMethod::as_str), false),
    };
    log.event(RecoveryEvent::PartitionWiped {
        partition: name.to_string(),
        method: method.to_string(),
        ok,
    });
    ok
}

/// `Err` carries the last primitive attempted, if any.
fn wipe_with_fallbacks(
    target: &mut dyn DiscardTarget,
    name: &str,
    log: &LogHandle,
) -> Result<WipeMethod, Option<WipeMethod>> {
    let len = match target.size() {
        Ok(0) => {
            log.error(format!("Failed to get partition size of \"{name}\": empty"));
            return Err(None);
        }
        Ok(len) => len,
        Err(e) => {
            log.error(format!("Failed to get partition size of \"{name}\": {e}"));
            return Err(None);
        }
    };
    let range = ByteRange { start: 0, len };
    log.info(format!("Secure-wiping \"{name}\" from 0 to {len}"));

    log.info("  Trying BLKSECDISCARD...");
    let Err(e) = target.secure_discard(range) else {
        return Ok(WipeMethod::SecureDiscard);
    };
    log.warn(format!("  Failed: {e}"));

    let (method, result) = if target.discard_zeroes_data().unwrap_or(false) {
        log.info("  Trying BLKDISCARD...");
        (WipeMethod::Discard, target.discard(range))
    } else {
        log.info("  Trying BLKZEROOUT...");
        (WipeMethod::ZeroOut, target.zero_out(range))
    };
    match result {
        Ok(()) => Ok(method),
        Err(e) => {
            log.error(format!("  Failed: {e}"));
            Err(Some(method))
        }
    }
}

// ──────────────────── test double ────────────────────

/// Which primitives a [`FakePartition`] supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FakeCapabilities {
    pub secure_discard: bool,
    pub discard_zeroes: bool,
    pub discard: bool,
    pub zero_out: bool,
}

/// Partition double recording every primitive called on it.
#[derive(Debug)]
pub struct FakePartition {
    size: u64,
    caps: FakeCapabilities,
    calls: std::sync::Arc<Mutex<Vec<String>>>,
}

impl DiscardTarget for FakePartition {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.size)
    }

    fn secure_discard(&mut self, range: ByteRange) -> io::Result<()> {
        self.attempt("secdiscard", self.caps.secure_discard, range)
    }

    fn discard_zeroes_data(&mut self) -> io::Result<bool> {
        Ok(self.caps.discard_zeroes)
    }

    fn discard(&mut self, range: ByteRange) -> io::Result<()> {
        self.attempt("discard", self.caps.discard, range)
    }

    fn zero_out(&mut self, range: ByteRange) -> io::Result<()> {
        self.attempt("zeroout", self.caps.zero_out, range)
    }
}

impl FakePartition {
    fn attempt(&mut self, op: &str, supported: bool, range: ByteRange) -> io::Result<()> {
        self.calls
            .lock()
            .push(format!("{op} {}+{}", range.start, range.len));
        if supported {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::Unsupported, op.to_string()))
        }
    }
}

/// Opener over a fixed set of fake partitions; unknown names fail to open.
#[derive(Debug, Default)]
pub struct FakePartitions {
    parts: Mutex<Vec<(String, u64, FakeCapabilities)>>,
    calls: std::sync::Arc<Mutex<Vec<String>>>,
}

impl FakePartitions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, name: &str, size: u64, caps: FakeCapabilities) -> Self {
        self.parts.lock().push((name.to_string(), size, caps));
        self
    }

    /// Every primitive invoked, prefixed by the partition name.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl PartitionOpener for FakePartitions {
    fn open(&self, name: &str) -> io::Result<Box<dyn DiscardTarget>> {
        let parts = self.parts.lock();
        let Some((_, size, caps)) = parts.iter().find(|(part, _, _)| part == name) else {
            return Err(io::Error::new(io::ErrorKind::NotFound, name.to_string()));
        };
        self.calls.lock().push(format!("open {name}"));
        Ok(Box::new(FakePartition {
            size: *size,
            caps: *caps,
            calls: self.calls.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn wipe(opener: &dyn PartitionOpener, name: &str, log: &LogHandle) -> bool {
        let mut target = opener.open(name).unwrap();
        secure_wipe_partition(target.as_mut(), name, log)
    }

    #[test]
    fn secure_discard_preferred() {
        let log = LogHandle::capture();
        let parts = FakePartitions::new().with(
            "userdata",
            4096,
            FakeCapabilities {
                secure_discard: true,
                ..FakeCapabilities::default()
            },
        );
        assert!(wipe(&parts, "userdata", &log));
        assert_eq!(parts.calls(), vec!["open userdata", "secdiscard 0+4096"]);
    }

    #[test]
    fn discard_used_only_when_it_zeroes() {
        let log = LogHandle::capture();
        let parts = FakePartitions::new()
            .with(
                "a",
                512,
                FakeCapabilities {
                    discard_zeroes: true,
                    discard: true,
                    ..FakeCapabilities::default()
                },
            )
            .with(
                "b",
                512,
                FakeCapabilities {
                    discard: true,
                    zero_out: true,
                    ..FakeCapabilities::default()
                },
            );
        assert!(wipe(&parts, "a", &log));
        assert!(wipe(&parts, "b", &log));
        assert_eq!(
            parts.calls(),
            vec![
                "open a",
                "secdiscard 0+512",
                "discard 0+512",
                "open b",
                "secdiscard 0+512",
                "zeroout 0+512",
            ]
        );
        assert!(log.contains("Trying BLKZEROOUT"));
    }

    #[test]
    fn all_primitives_failing_reports_failure() {
        let log = LogHandle::capture();
        let parts = FakePartitions::new().with("x", 64, FakeCapabilities::default());
        assert!(!wipe(&parts, "x", &log));
        let events = log.captured_events();
        let last = events.last().unwrap();
        assert_eq!(last.ok, Some(false));
        assert_eq!(last.source.as_deref(), Some("zeroout"));
    }

    #[test]
    fn zero_sized_partition_fails() {
        let log = LogHandle::capture();
        let parts = FakePartitions::new().with("empty", 0, FakeCapabilities::default());
        assert!(!wipe(&parts, "empty", &log));
        assert_eq!(parts.calls(), vec!["open empty"]);
    }

    #[test]
    fn image_file_is_zero_filled() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("vendor_a");
        let noise: Vec<u8> = (0..8192).map(|_| rand::random::<u8>() | 1).collect();
        fs::write(&image, &noise).unwrap();

        let log = LogHandle::capture();
        let opener = ByNameOpener::new(dir.path());
        assert!(wipe(&opener, "vendor_a", &log));
        assert!(fs::read(&image).unwrap().iter().all(|b| *b == 0));
        assert_eq!(opener.resolve("/abs/part"), PathBuf::from("/abs/part"));
    }
}

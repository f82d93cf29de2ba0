//! Wipe packages for A/B devices: staging, verification, metadata checks.

#![allow(missing_docs)]

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::core::errors::{RecoveryError, Result};
use crate::logger::session::LogHandle;
use crate::platform::pal::PropertyStore;

/// Where a wipe package is staged relative to the start of the misc device.
pub const WIPE_PACKAGE_OFFSET: u64 = 16 * 1024;

const OTA_TYPE_BRICK: &str = "ota-type=BRICK";
const PRE_DEVICE: &str = "pre-device=";
const SERIALNO: &str = "serialno=";

/// Signature verification and metadata extraction.
pub trait PackageVerifier: Send + Sync {
    fn verify(&self, package: &[u8]) -> bool;
    /// The package's metadata text, `key=value` per line.
    fn metadata(&self, package: &[u8]) -> Option<String>;
}

/// Source of the staged wipe package bytes.
pub trait WipeStaging: Send + Sync {
    fn read(&self, size: u64) -> Result<Vec<u8>>;
}

// ──────────────────── adapters ────────────────────

/// Verifier binary: `--verify` exits 0 for a good signature, `--metadata`
/// prints the metadata. The package is fed on stdin.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    binary: PathBuf,
}

impl CommandVerifier {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, mode: &str, package: &[u8]) -> Result<(bool, Vec<u8>)> {
        let mut child = Command::new(&self.binary)
            .arg(mode)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RecoveryError::io(&self.binary, e))?;

        let stdin = child.stdin.take();
        let mut stdout = child.stdout.take();
        let output = std::thread::scope(|scope| {
            scope.spawn(move || {
                if let Some(mut stdin) = stdin {
                    // The verifier may stop reading early; a broken pipe is its verdict.
                    let _ = stdin.write_all(package);
                }
            });
            let mut output = Vec::new();
            if let Some(stdout) = stdout.as_mut() {
                let _ = stdout.read_to_end(&mut output);
            }
            output
        });
        let status = child.wait().map_err(|e| RecoveryError::io(&self.binary, e))?;
        Ok((status.success(), output))
    }
}

impl PackageVerifier for CommandVerifier {
    fn verify(&self, package: &[u8]) -> bool {
        self.run("--verify", package).is_ok_and(|(ok, _)| ok)
    }

    fn metadata(&self, package: &[u8]) -> Option<String> {
        match self.run("--metadata", package) {
            Ok((true, output)) => Some(String::from_utf8_lossy(&output).into_owned()),
            _ => None,
        }
    }
}

/// Reads the package from a fixed offset of a file or block device.
#[derive(Debug, Clone)]
pub struct FileStaging {
    path: PathBuf,
    offset: u64,
}

impl FileStaging {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: WIPE_PACKAGE_OFFSET,
        }
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

impl WipeStaging for FileStaging {
    fn read(&self, size: u64) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path).map_err(|e| RecoveryError::io(&self.path, e))?;
        // Block devices report a zero metadata length; seeking finds the real end.
        let end = file
            .seek(SeekFrom::End(0))
            .map_err(|e| RecoveryError::io(&self.path, e))?;
        let available = end.saturating_sub(self.offset);
        if size > available {
            return Err(RecoveryError::Precondition {
                details: format!(
                    "wipe package size {size} exceeds {available} bytes staged in {}",
                    self.path.display()
                ),
            });
        }
        let len = usize::try_from(size).map_err(|_| RecoveryError::Precondition {
            details: format!("wipe package size {size} too large"),
        })?;
        let mut buf = vec![0u8; len];
        file.read_exact_at(&mut buf, self.offset)
            .map_err(|e| RecoveryError::io(&self.path, e))?;
        Ok(buf)
    }
}

/// Verifier double with a fixed verdict and metadata.
#[derive(Debug, Clone, Default)]
pub struct ScriptedVerifier {
    pub accept: bool,
    pub metadata: Option<String>,
}

impl ScriptedVerifier {
    #[must_use]
    pub fn accepting(metadata: &str) -> Self {
        Self {
            accept: true,
            metadata: Some(metadata.to_string()),
        }
    }

    #[must_use]
    pub fn rejecting() -> Self {
        Self::default()
    }
}

impl PackageVerifier for ScriptedVerifier {
    fn verify(&self, _package: &[u8]) -> bool {
        self.accept
    }

    fn metadata(&self, _package: &[u8]) -> Option<String> {
        self.metadata.clone()
    }
}

/// Staging double holding the package in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStaging {
    pub bytes: Vec<u8>,
}

impl WipeStaging for MemoryStaging {
    fn read(&self, size: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(size).unwrap_or(usize::MAX);
        self.bytes
            .get(..len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| RecoveryError::Precondition {
                details: format!("staged package shorter than {size} bytes"),
            })
    }
}

// ──────────────────── checks ────────────────────

/// Accept the staged package only if it verifies and its metadata marks it
/// as a brick package for this product (and this serial number, if named).
pub fn check_wipe_package(
    size: u64,
    staging: &dyn WipeStaging,
    verifier: &dyn PackageVerifier,
    props: &dyn PropertyStore,
    log: &LogHandle,
) -> bool {
    if size == 0 {
        log.error("wipe_package_size is zero");
        return false;
    }
    let package = match staging.read(size) {
        Ok(package) => package,
        Err(e) => {
            log.failure("read wipe package", &e);
            return false;
        }
    };
    if !verifier.verify(&package) {
        log.error("Failed to verify package");
        return false;
    }
    let Some(metadata) = verifier.metadata(&package) else {
        log.error("Failed to read metadata from wipe package");
        return false;
    };
    match metadata_mismatch(&metadata, props) {
        None => true,
        Some(reason) => {
            log.error(format!("wipe package rejected: {reason}"));
            false
        }
    }
}

fn metadata_mismatch(metadata: &str, props: &dyn PropertyStore) -> Option<String> {
    let mut brick = false;
    for line in metadata.lines() {
        if line == OTA_TYPE_BRICK {
            brick = true;
        } else if let Some(product) = line.strip_prefix(PRE_DEVICE) {
            let actual = props.get_or("ro.build.product", "");
            if product != actual {
                return Some(format!("built for {product:?}, this is {actual:?}"));
            }
        } else if let Some(serial) = line.strip_prefix(SERIALNO) {
            let actual = props.get_or("ro.serialno", "");
            if serial != actual {
                return Some(format!("serial number {serial:?} does not match"));
            }
        }
    }
    (!brick).then(|| "not a brick package".to_string())
}

/// Partition names from a wipe manifest; `#` comments and blank lines skipped.
#[must_use]
pub fn parse_wipe_manifest(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

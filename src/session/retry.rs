//! Install retry counter persisted inside the control block.
//!
//! The counter travels as a single `--retry_count=N` token in the pending
//! arguments. It is written before the installer runs, so a crash mid-install
//! comes back as "attempt N started" rather than as a fresh request.

#![allow(missing_docs)]

use std::path::Path;

use crate::bootloader::control_block::ControlBlockStore;
use crate::logger::session::{LogHandle, RecoveryEvent};

const RETRY_PREFIX: &str = "--retry_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Counter persisted; reboot into this mode to try again.
    RebootAndResume { attempt: u32 },
    /// Out of attempts; report the failure.
    Exhausted,
}

pub struct RetryLedger<'a> {
    store: &'a ControlBlockStore,
    args: &'a [String],
    limit: u32,
    log: &'a LogHandle,
}

impl<'a> RetryLedger<'a> {
    #[must_use]
    pub fn new(
        store: &'a ControlBlockStore,
        args: &'a [String],
        limit: u32,
        log: &'a LogHandle,
    ) -> Self {
        Self {
            store,
            args,
            limit,
            log,
        }
    }

    /// Record that a fresh request has started (counter 0 becomes 1).
    ///
    /// Returns whether anything was written.
    pub fn mark_started(&self, current: u32) -> bool {
        if current != 0 {
            return false;
        }
        self.persist(1)
    }

    /// Bump the counter after a retryable failure, if the limit allows.
    pub fn on_retry_failure(&self, package: &Path, current: u32) -> RetryDecision {
        if current >= self.limit {
            self.log.warn(format!(
                "retry limit {} reached for {}",
                self.limit,
                package.display()
            ));
            return RetryDecision::Exhausted;
        }
        let attempt = current + 1;
        self.persist(attempt);
        self.log.event(RecoveryEvent::RetryScheduled {
            package: package.display().to_string(),
            attempt,
        });
        RetryDecision::RebootAndResume { attempt }
    }

    fn persist(&self, count: u32) -> bool {
        self.store.write_pending(&args_with_count(self.args, count))
    }
}

/// `args` without any retry token, followed by `--retry_count=count`.
#[must_use]
pub fn args_with_count(args: &[String], count: u32) -> Vec<String> {
    args.iter()
        .filter(|arg| !arg.starts_with(RETRY_PREFIX))
        .cloned()
        .chain(std::iter::once(format!("{RETRY_PREFIX}={count}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootloader::control_block::{InMemoryControlBlock, PendingArgs};
    use std::sync::Arc;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn replaces_existing_count() {
        assert_eq!(
            args_with_count(
                &strings(&["--update_package=/cache/a.zip", "--retry_count=2", "--show_text"]),
                3
            ),
            strings(&["--update_package=/cache/a.zip", "--show_text", "--retry_count=3"])
        );
    }

    #[test]
    fn fresh_start_persists_one() {
        let device = Arc::new(InMemoryControlBlock::new());
        let log = LogHandle::capture();
        let store = ControlBlockStore::new(device.clone(), log.clone());
        let args = strings(&["--update_package=/cache/a.zip"]);
        let ledger = RetryLedger::new(&store, &args, 4, &log);

        assert!(ledger.mark_started(0));
        assert_eq!(
            device.snapshot().pending_args(),
            PendingArgs::Args(strings(&["--update_package=/cache/a.zip", "--retry_count=1"]))
        );
        assert!(!ledger.mark_started(2));
        assert_eq!(device.writes(), 1);
    }

    #[test]
    fn bounded_by_limit() {
        let device = Arc::new(InMemoryControlBlock::new());
        let log = LogHandle::capture();
        let store = ControlBlockStore::new(device.clone(), log.clone());
        let args = strings(&["--update_package=/cache/a.zip", "--retry_count=3"]);
        let ledger = RetryLedger::new(&store, &args, 4, &log);
        let package = Path::new("/cache/a.zip");

        assert_eq!(
            ledger.on_retry_failure(package, 3),
            RetryDecision::RebootAndResume { attempt: 4 }
        );
        assert_eq!(
            device.snapshot().pending_args(),
            PendingArgs::Args(strings(&["--update_package=/cache/a.zip", "--retry_count=4"]))
        );

        let writes = device.writes();
        assert_eq!(ledger.on_retry_failure(package, 4), RetryDecision::Exhausted);
        assert_eq!(device.writes(), writes);
        assert!(log.contains("retry limit 4 reached"));
    }
}

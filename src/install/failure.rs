//! Structured install-failure record consumed after reboot.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use crate::core::errors::RecoveryError;
use crate::logger::session::LogHandle;

/// Why an install was skipped before the installer ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    LowBattery,
    BootreasonInBlacklist,
}

impl FailureCode {
    #[must_use]
    pub const fn value(self) -> u32 {
        match self {
            Self::LowBattery => 20,
            Self::BootreasonInBlacklist => 23,
        }
    }
}

/// Three lines: package path, `0` (install result), `error: <code>`.
#[must_use]
pub fn failure_record(package: &Path, code: FailureCode) -> String {
    format!("{}\n0\nerror: {}", package.display(), code.value())
}

/// Write the record to `dest` and echo it into the session log.
pub fn write_failure_record(dest: &Path, package: &Path, code: FailureCode, log: &LogHandle) {
    let record = failure_record(package, code);
    if let Err(e) = fs::write(dest, &record) {
        log.failure("write failure record", &RecoveryError::io(dest, e));
    }
    log.info(record);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_format() {
        assert_eq!(
            failure_record(Path::new("/cache/a.zip"), FailureCode::LowBattery),
            "/cache/a.zip\n0\nerror: 20"
        );
    }

    #[test]
    fn write_creates_file_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("last_install");
        let log = LogHandle::capture();
        write_failure_record(
            &dest,
            Path::new("/cache/a.zip"),
            FailureCode::BootreasonInBlacklist,
            &log,
        );
        assert_eq!(
            fs::read_to_string(&dest).unwrap(),
            "/cache/a.zip\n0\nerror: 23"
        );
        assert!(log.contains("error: 23"));
    }

    #[test]
    fn unwritable_destination_is_logged() {
        let log = LogHandle::capture();
        write_failure_record(
            Path::new("/nonexistent/dir/last_install"),
            Path::new("/cache/a.zip"),
            FailureCode::LowBattery,
            &log,
        );
        assert!(log.contains("RCV-2001"));
        assert!(log.contains("error: 20"));
    }
}

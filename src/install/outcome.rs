//! Install outcome classification.

#![allow(missing_docs)]

/// Result of one install (or of a session step reported like one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallResult {
    Success,
    Error,
    Corrupt,
    /// Nothing was attempted.
    None,
    /// A precondition failed; the installer never ran.
    Skipped,
    /// Transient failure; worth a reboot and another attempt.
    Retry,
    /// Signature verification failed.
    Unverified,
}

impl InstallResult {
    /// Numeric status shown to the user and recorded in logs.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Error => 1,
            Self::Corrupt => 2,
            Self::None => 3,
            Self::Skipped => 4,
            Self::Retry => 5,
            Self::Unverified => 6,
        }
    }

    /// Interpret an installer exit status.
    #[must_use]
    pub const fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            2 => Self::Corrupt,
            3 => Self::None,
            4 => Self::Skipped,
            5 => Self::Retry,
            6 => Self::Unverified,
            _ => Self::Error,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Corrupt => "corrupt",
            Self::None => "none",
            Self::Skipped => "skipped",
            Self::Retry => "retry",
            Self::Unverified => "unverified",
        }
    }

    /// Outcomes that paint the error background.
    #[must_use]
    pub const fn is_failure_screen(self) -> bool {
        matches!(self, Self::Error | Self::Corrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_map_back() {
        for result in [
            InstallResult::Success,
            InstallResult::Error,
            InstallResult::Corrupt,
            InstallResult::None,
            InstallResult::Skipped,
            InstallResult::Retry,
            InstallResult::Unverified,
        ] {
            assert_eq!(InstallResult::from_exit_code(result.code()), result);
        }
    }

    #[test]
    fn unknown_exit_code_is_error() {
        assert_eq!(InstallResult::from_exit_code(-1), InstallResult::Error);
        assert_eq!(InstallResult::from_exit_code(77), InstallResult::Error);
    }

    #[test]
    fn failure_screen_only_for_error_and_corrupt() {
        assert!(InstallResult::Error.is_failure_screen());
        assert!(InstallResult::Corrupt.is_failure_screen());
        assert!(!InstallResult::Retry.is_failure_screen());
        assert!(!InstallResult::Skipped.is_failure_screen());
    }
}

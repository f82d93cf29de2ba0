//! RCV-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Top-level error type for the recovery control plane.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("[RCV-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[RCV-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[RCV-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[RCV-2001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[RCV-2002] control block failure: {details}")]
    ControlBlock { details: String },

    #[error("[RCV-2003] volume failure for {volume}: {details}")]
    Volume { volume: PathBuf, details: String },

    #[error("[RCV-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[RCV-3001] verification failed: {details}")]
    Verification { details: String },

    #[error("[RCV-4001] precondition failed: {details}")]
    Precondition { details: String },

    #[error("[RCV-5001] retryable install failure: {details}")]
    Retryable { details: String },

    #[error("[RCV-9001] fatal: {details}")]
    Fatal { details: String },
}

impl RecoveryError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "RCV-1001",
            Self::MissingConfig { .. } => "RCV-1002",
            Self::ConfigParse { .. } => "RCV-1003",
            Self::Io { .. } => "RCV-2001",
            Self::ControlBlock { .. } => "RCV-2002",
            Self::Volume { .. } => "RCV-2003",
            Self::Serialization { .. } => "RCV-2101",
            Self::Verification { .. } => "RCV-3001",
            Self::Precondition { .. } => "RCV-4001",
            Self::Retryable { .. } => "RCV-5001",
            Self::Fatal { .. } => "RCV-9001",
        }
    }

    /// Whether a power-cycle retry might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. } | Self::Io { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for volume errors.
    #[must_use]
    pub fn volume(volume: impl AsRef<Path>, details: impl Into<String>) -> Self {
        Self::Volume {
            volume: volume.as_ref().to_path_buf(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for RecoveryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for RecoveryError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_variant() -> Vec<RecoveryError> {
        vec![
            RecoveryError::InvalidConfig {
                details: String::new(),
            },
            RecoveryError::MissingConfig {
                path: PathBuf::new(),
            },
            RecoveryError::ConfigParse {
                context: "",
                details: String::new(),
            },
            RecoveryError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            RecoveryError::ControlBlock {
                details: String::new(),
            },
            RecoveryError::Volume {
                volume: PathBuf::new(),
                details: String::new(),
            },
            RecoveryError::Serialization {
                context: "",
                details: String::new(),
            },
            RecoveryError::Verification {
                details: String::new(),
            },
            RecoveryError::Precondition {
                details: String::new(),
            },
            RecoveryError::Retryable {
                details: String::new(),
            },
            RecoveryError::Fatal {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = every_variant();
        let codes: Vec<&str> = errors.iter().map(RecoveryError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_carries_code_prefix() {
        for err in every_variant() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain {}: {msg}",
                err.code()
            );
            assert!(err.code().starts_with("RCV-"));
        }
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(
            RecoveryError::Retryable {
                details: "bspatch".to_string()
            }
            .is_retryable()
        );
        assert!(RecoveryError::io("/cache/a.zip", std::io::Error::other("eio")).is_retryable());

        assert!(
            !RecoveryError::Verification {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !RecoveryError::Precondition {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !RecoveryError::Fatal {
                details: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn io_convenience_constructor() {
        let err = RecoveryError::io(
            "/cache/recovery/command",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "RCV-2001");
        assert!(err.to_string().contains("/cache/recovery/command"));
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: RecoveryError = toml_err.into();
        assert_eq!(err.code(), "RCV-1003");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: RecoveryError = json_err.into();
        assert_eq!(err.code(), "RCV-2101");
    }
}

//! External installer and sideload transport.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use parking_lot::Mutex;

use crate::core::errors::{RecoveryError, Result};
use crate::install::outcome::InstallResult;

/// One call into the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub package: PathBuf,
    pub retry_count: u32,
    /// Cleared only by the interactive "install anyway" override.
    pub verify: bool,
    /// Where the installer leaves its own result record.
    pub install_log: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallReport {
    pub result: InstallResult,
    /// The package asked for the cache volume to be wiped afterwards.
    pub wipe_cache: bool,
}

impl InstallReport {
    #[must_use]
    pub const fn new(result: InstallResult) -> Self {
        Self {
            result,
            wipe_cache: false,
        }
    }

    #[must_use]
    pub const fn with_cache_wipe(mut self) -> Self {
        self.wipe_cache = true;
        self
    }
}

pub trait PackageInstaller: Send + Sync {
    fn install(&self, request: &InstallRequest) -> InstallReport;
}

// ──────────────────── command installer ────────────────────

/// Installer binary; exit status is the `InstallResult` code and a stdout
/// line `wipe_cache` requests a cache wipe.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    binary: PathBuf,
}

impl CommandInstaller {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, request: &InstallRequest) -> Result<InstallReport> {
        let mut command = Command::new(&self.binary);
        command
            .arg(format!("--package={}", request.package.display()))
            .arg(format!("--retry_count={}", request.retry_count))
            .arg(format!("--install_log={}", request.install_log.display()))
            .stdout(Stdio::piped());
        if !request.verify {
            command.arg("--no_verify");
        }
        let mut child = command
            .spawn()
            .map_err(|e| RecoveryError::io(&self.binary, e))?;

        let mut wipe_cache = false;
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(std::io::Result::ok) {
                if line.trim() == "wipe_cache" {
                    wipe_cache = true;
                }
            }
        }
        let status = child.wait().map_err(|e| RecoveryError::io(&self.binary, e))?;
        let result = status
            .code()
            .map_or(InstallResult::Error, InstallResult::from_exit_code);
        Ok(InstallReport { result, wipe_cache })
    }
}

impl PackageInstaller for CommandInstaller {
    fn install(&self, request: &InstallRequest) -> InstallReport {
        self.run(request)
            .unwrap_or(InstallReport::new(InstallResult::Error))
    }
}

/// Installer double: replays reports in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedInstaller {
    reports: Mutex<VecDeque<InstallReport>>,
    requests: Mutex<Vec<InstallRequest>>,
}

impl ScriptedInstaller {
    #[must_use]
    pub fn new<I: IntoIterator<Item = InstallReport>>(reports: I) -> Self {
        Self {
            reports: Mutex::new(reports.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn requests(&self) -> Vec<InstallRequest> {
        self.requests.lock().clone()
    }
}

impl PackageInstaller for ScriptedInstaller {
    fn install(&self, request: &InstallRequest) -> InstallReport {
        self.requests.lock().push(request.clone());
        self.reports
            .lock()
            .pop_front()
            .unwrap_or(InstallReport::new(InstallResult::Error))
    }
}

// ──────────────────── sideload ────────────────────

/// Host-to-device package transport.
pub trait SideloadTransport: Send + Sync {
    fn start(&self) -> Result<()>;
    /// Wait for the pushed package; `cancel` abandons the transfer.
    fn wait_for_package(&self, cancel: bool) -> Option<PathBuf>;
    fn stop(&self);
}

/// Transport whose host side drops the package into a spool file.
#[derive(Debug, Clone)]
pub struct SpoolSideload {
    package: PathBuf,
}

impl SpoolSideload {
    #[must_use]
    pub fn new(package: impl Into<PathBuf>) -> Self {
        Self {
            package: package.into(),
        }
    }

    #[must_use]
    pub fn package_path(&self) -> &Path {
        &self.package
    }
}

impl SideloadTransport for SpoolSideload {
    fn start(&self) -> Result<()> {
        if let Some(parent) = self.package.parent() {
            fs::create_dir_all(parent).map_err(|e| RecoveryError::io(parent, e))?;
        }
        Ok(())
    }

    fn wait_for_package(&self, cancel: bool) -> Option<PathBuf> {
        if cancel || !self.package.is_file() {
            return None;
        }
        Some(self.package.clone())
    }

    fn stop(&self) {
        let _ = fs::remove_file(&self.package);
    }
}

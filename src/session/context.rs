//! Session context: every piece of per-process state, threaded by reference.

#![allow(missing_docs)]

use std::fs;
use std::sync::Arc;

use crate::bootloader::command_queue::CommandQueue;
use crate::bootloader::control_block::{ControlBlockDevice, ControlBlockStore};
use crate::core::config::Config;
use crate::core::errors::RecoveryError;
use crate::install::battery::{BatteryMonitor, Clock};
use crate::install::external::{PackageInstaller, SideloadTransport};
use crate::logger::copy::{ArchivePaths, LogArchive};
use crate::logger::session::LogHandle;
use crate::platform::pal::{PropertyStore, VolumeManager};
use crate::session::terminal::PowerControl;
use crate::ui::device::Device;
use crate::ui::screen::RecoveryUi;
use crate::wipe::ab::{PackageVerifier, WipeStaging};
use crate::wipe::secure::PartitionOpener;

/// External collaborators a session is built from.
pub struct Collaborators {
    pub volumes: Arc<dyn VolumeManager>,
    pub props: Arc<dyn PropertyStore>,
    pub control_block: Arc<dyn ControlBlockDevice>,
    pub installer: Arc<dyn PackageInstaller>,
    pub verifier: Arc<dyn PackageVerifier>,
    pub staging: Arc<dyn WipeStaging>,
    pub sideload: Arc<dyn SideloadTransport>,
    pub partitions: Arc<dyn PartitionOpener>,
    pub battery: Arc<dyn BatteryMonitor>,
    pub clock: Arc<dyn Clock>,
    pub power: Arc<dyn PowerControl>,
    pub ui: Box<dyn RecoveryUi>,
    pub device: Box<dyn Device>,
}

/// Services only the orchestrators call.
pub struct Services {
    pub installer: Arc<dyn PackageInstaller>,
    pub verifier: Arc<dyn PackageVerifier>,
    pub staging: Arc<dyn WipeStaging>,
    pub sideload: Arc<dyn SideloadTransport>,
    pub partitions: Arc<dyn PartitionOpener>,
    pub battery: Arc<dyn BatteryMonitor>,
    pub clock: Arc<dyn Clock>,
    pub power: Arc<dyn PowerControl>,
}

/// Whether user data may be offered as an update source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserdataState {
    pub encrypted: bool,
    pub mountable: bool,
}

impl Default for UserdataState {
    fn default() -> Self {
        Self {
            encrypted: true,
            mountable: false,
        }
    }
}

pub struct SessionContext {
    pub config: Config,
    pub log: LogHandle,
    pub ui: Box<dyn RecoveryUi>,
    pub device: Box<dyn Device>,
    pub volumes: Arc<dyn VolumeManager>,
    pub props: Arc<dyn PropertyStore>,
    pub store: ControlBlockStore,
    /// The queue file; only consulted when `has_cache`.
    pub queue: CommandQueue,
    pub archive: LogArchive,
    pub services: Services,
    pub locale: String,
    pub reason: Option<String>,
    pub stage: String,
    pub has_cache: bool,
    /// Set by every wipe or install; gates log rotation at finalize.
    pub modified_flash: bool,
    pub userdata: UserdataState,
}

impl SessionContext {
    #[must_use]
    pub fn new(config: Config, log: LogHandle, parts: Collaborators) -> Self {
        let has_cache = parts.volumes.has_volume(&config.paths.cache_root);
        let store = ControlBlockStore::new(parts.control_block, log.clone());
        let queue = CommandQueue::new(config.paths.command_file()).with_volumes(parts.volumes.clone());
        let archive = LogArchive::new(ArchivePaths::from_config(&config));
        let locale = config.ui.default_locale.clone();

        Self {
            config,
            log,
            ui: parts.ui,
            device: parts.device,
            volumes: parts.volumes,
            props: parts.props,
            store,
            queue,
            archive,
            services: Services {
                installer: parts.installer,
                verifier: parts.verifier,
                staging: parts.staging,
                sideload: parts.sideload,
                partitions: parts.partitions,
                battery: parts.battery,
                clock: parts.clock,
                power: parts.power,
            },
            locale,
            reason: None,
            stage: String::new(),
            has_cache,
            modified_flash: false,
            userdata: UserdataState::default(),
        }
    }

    /// Show `text` on screen and record it in the session log.
    pub fn print(&mut self, text: &str) {
        self.ui.print(text);
        self.log.info(text);
    }

    pub fn failure(&mut self, context: &str, err: &RecoveryError) {
        self.log.failure(context, err);
    }

    /// Persist logs into the log directory.
    ///
    /// Skipped unless this session modified flash, so no-op boots do not
    /// rotate older generations away.
    pub fn copy_logs(&mut self) {
        if !self.modified_flash || !self.has_cache {
            return;
        }
        let log_dir = self.config.paths.log_dir.clone();
        if let Err(e) = self.volumes.ensure_mounted(&log_dir) {
            self.log.failure("mount log directory", &e);
            return;
        }
        if let Err(e) = fs::create_dir_all(&log_dir) {
            self.log
                .failure("create log directory", &RecoveryError::io(&log_dir, e));
            return;
        }
        self.archive.persist(&self.log);
    }

    /// `ro.debuggable` builds show text automatically after failures.
    #[must_use]
    pub fn is_debuggable(&self) -> bool {
        self.props.get_bool("ro.debuggable", false)
    }
}

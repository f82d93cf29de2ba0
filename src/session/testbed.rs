//! A complete session wired to in-memory and directory-backed doubles.
//!
//! Every volume is a directory under one root, so a whole maintenance session
//! (wipes, installs, log rotation, finalization) can run on a host.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bootloader::control_block::InMemoryControlBlock;
use crate::core::config::Config;
use crate::install::battery::{ChargeStatus, FakeClock, ScriptedBattery};
use crate::install::external::{ScriptedInstaller, SpoolSideload};
use crate::logger::session::LogHandle;
use crate::platform::pal::{DirectoryVolumes, StaticProperties};
use crate::session::context::{Collaborators, SessionContext};
use crate::session::terminal::RecordingPowerControl;
use crate::ui::device::DefaultDevice;
use crate::ui::screen::ScriptedUi;
use crate::wipe::ab::{MemoryStaging, ScriptedVerifier};
use crate::wipe::secure::FakePartitions;

/// Product reported by the testbed's properties.
pub const TESTBED_PRODUCT: &str = "generic";

pub struct Testbed {
    pub root: PathBuf,
    pub config: Config,
    pub log: LogHandle,
    pub volumes: Arc<DirectoryVolumes>,
    pub props: Arc<StaticProperties>,
    pub control_block: Arc<InMemoryControlBlock>,
    pub installer: Arc<ScriptedInstaller>,
    pub verifier: Arc<ScriptedVerifier>,
    pub staging: Arc<MemoryStaging>,
    pub sideload: Arc<SpoolSideload>,
    pub partitions: Arc<FakePartitions>,
    pub battery: Arc<ScriptedBattery>,
    pub clock: Arc<FakeClock>,
    pub power: Arc<RecordingPowerControl>,
}

impl Testbed {
    /// Cache, data, metadata, system and one storage volume under `root`.
    pub fn at(root: &Path) -> io::Result<Self> {
        Self::build(root, true)
    }

    /// Same layout without a cache volume.
    pub fn at_without_cache(root: &Path) -> io::Result<Self> {
        Self::build(root, false)
    }

    fn build(root: &Path, with_cache: bool) -> io::Result<Self> {
        let mut config = Config::default();
        let paths = &mut config.paths;
        paths.config_file = root.join("etc/recovery.toml");
        paths.cache_root = root.join("cache");
        paths.data_root = root.join("data");
        paths.metadata_root = root.join("metadata");
        paths.system_root = root.join("system");
        paths.log_dir = root.join("cache/recovery");
        paths.temporary_log = root.join("tmp/recovery.log");
        paths.temporary_install = root.join("tmp/last_install");
        paths.temporary_events = root.join("tmp/recovery.jsonl");
        paths.convert_fbe_dir = root.join("tmp/convert_fbe");
        paths.wipe_manifest = root.join("etc/recovery.wipe");
        paths.control_block = root.join("misc");
        paths.volume_table = root.join("etc/recovery.fstab");
        config.install.battery_settle_timeout_secs = 3;

        let storage = root.join("sdcard");
        let mut volumes = DirectoryVolumes::new()
            .with_volume(&config.paths.data_root, false)
            .with_volume(&config.paths.metadata_root, false)
            .with_volume(&config.paths.system_root, false)
            .with_volume(&storage, true);
        if with_cache {
            volumes = volumes.with_volume(&config.paths.cache_root, false);
        }
        for dir in [
            root.join("tmp"),
            root.join("etc"),
            config.paths.data_root.clone(),
            config.paths.metadata_root.clone(),
            config.paths.system_root.clone(),
            storage,
        ] {
            fs::create_dir_all(dir)?;
        }
        if with_cache {
            fs::create_dir_all(&config.paths.cache_root)?;
        }

        Ok(Self {
            root: root.to_path_buf(),
            log: LogHandle::capture(),
            volumes: Arc::new(volumes),
            props: Arc::new(StaticProperties::new().with("ro.build.product", TESTBED_PRODUCT)),
            control_block: Arc::new(InMemoryControlBlock::new()),
            installer: Arc::new(ScriptedInstaller::default()),
            verifier: Arc::new(ScriptedVerifier::rejecting()),
            staging: Arc::new(MemoryStaging::default()),
            sideload: Arc::new(SpoolSideload::new(root.join("tmp/sideload/package.zip"))),
            partitions: Arc::new(FakePartitions::new()),
            battery: Arc::new(ScriptedBattery::steady(ChargeStatus::Charging, 100)),
            clock: Arc::new(FakeClock::new()),
            power: Arc::new(RecordingPowerControl::new()),
            config,
        })
    }

    /// Storage volume offered by the apply-update menu.
    #[must_use]
    pub fn storage_root(&self) -> PathBuf {
        self.root.join("sdcard")
    }

    /// A fresh session over the testbed with an unattended UI.
    #[must_use]
    pub fn context(&self) -> SessionContext {
        self.context_with(ScriptedUi::default())
    }

    #[must_use]
    pub fn context_with(&self, ui: ScriptedUi) -> SessionContext {
        SessionContext::new(
            self.config.clone(),
            self.log.clone(),
            Collaborators {
                volumes: self.volumes.clone(),
                props: self.props.clone(),
                control_block: self.control_block.clone(),
                installer: self.installer.clone(),
                verifier: self.verifier.clone(),
                staging: self.staging.clone(),
                sideload: self.sideload.clone(),
                partitions: self.partitions.clone(),
                battery: self.battery.clone(),
                clock: self.clock.clone(),
                power: self.power.clone(),
                ui: Box::new(ui),
                device: Box::new(DefaultDevice::new()),
            },
        )
    }
}

#[cfg(test)]
impl Testbed {
    pub(crate) fn temp() -> (tempfile::TempDir, Self) {
        let dir = tempfile::tempdir().unwrap();
        let tb = Self::at(dir.path()).unwrap();
        (dir, tb)
    }

    pub(crate) fn temp_without_cache() -> (tempfile::TempDir, Self) {
        let dir = tempfile::tempdir().unwrap();
        let tb = Self::at_without_cache(dir.path()).unwrap();
        (dir, tb)
    }
}

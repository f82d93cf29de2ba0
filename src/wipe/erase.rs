//! Volume erase flows and the log files they must carry across a reformat.

#![allow(missing_docs)]

use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::errors::RecoveryError;
use crate::logger::session::{LogHandle, RecoveryEvent};
use crate::session::context::{SessionContext, UserdataState};
use crate::ui::prompts::yes_no;
use crate::ui::screen::{Background, Progress};
use crate::wipe::ab::{check_wipe_package, parse_wipe_manifest};
use crate::wipe::secure::secure_wipe_partition;

/// `--reason` that turns a data wipe into an encryption conversion request.
pub const CONVERT_FBE_REASON: &str = "convert_fbe";

const IRREVERSIBLE: &str = "  THIS CAN NOT BE UNDONE!";

// ──────────────────── saved logs ────────────────────

/// A log file held in memory while its volume is reformatted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedLogFile {
    pub path: PathBuf,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub data: Vec<u8>,
}

impl SavedLogFile {
    /// Read at most `cap` bytes of `path` together with its ownership.
    pub fn capture(path: &Path, cap: u64) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let mut data = Vec::new();
        File::open(path)?.take(cap).read_to_end(&mut data)?;
        Ok(Self {
            path: path.to_path_buf(),
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
            data,
        })
    }

    /// Write the content back with the original mode and owner.
    pub fn restore(&self) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(self.mode)
            .open(&self.path)?;
        file.write_all(&self.data)?;
        file.sync_all()?;
        fs::set_permissions(&self.path, fs::Permissions::from_mode(self.mode))?;
        nix::unistd::chown(
            self.path.as_path(),
            Some(nix::unistd::Uid::from_raw(self.uid)),
            Some(nix::unistd::Gid::from_raw(self.gid)),
        )
        .map_err(io::Error::from)
    }
}

/// Snapshot `log` and every `last_*` file directly inside `dir`.
pub fn snapshot_logs(dir: &Path, cap: u64, log: &LogHandle) -> Vec<SavedLogFile> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            log.failure("open log directory", &RecoveryError::io(dir, e));
            return Vec::new();
        }
    };
    let mut saved: Vec<SavedLogFile> = entries
        .flatten()
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with("last_") || name == "log"
        })
        .filter_map(|entry| match SavedLogFile::capture(&entry.path(), cap) {
            Ok(file) => Some(file),
            Err(e) => {
                log.warn(format!("can't save {}: {e}", entry.path().display()));
                None
            }
        })
        .collect();
    saved.sort_by(|a, b| a.path.cmp(&b.path));
    saved
}

// ──────────────────── orchestrator ────────────────────

pub struct WipeOrchestrator<'a> {
    ctx: &'a mut SessionContext,
}

impl<'a> WipeOrchestrator<'a> {
    pub fn new(ctx: &'a mut SessionContext) -> Self {
        Self { ctx }
    }

    /// Reformat the volume mounted at `volume`.
    ///
    /// Cache keeps its logs across the format. Data under the `convert_fbe`
    /// reason is not formatted at all: a breadcrumb is left for the next boot
    /// and the erase reports success.
    pub fn erase_volume(&mut self, volume: &Path) -> bool {
        let started = Instant::now();
        let paths = &self.ctx.config.paths;
        let is_cache = volume == paths.cache_root;
        let is_data = volume == paths.data_root;
        let log_dir = paths.log_dir.clone();

        let saved = if is_cache {
            if let Err(e) = self.ctx.volumes.ensure_mounted(volume) {
                self.ctx.log.failure("mount cache", &e);
            }
            snapshot_logs(
                &log_dir,
                self.ctx.config.logging.saved_log_cap_bytes,
                &self.ctx.log,
            )
        } else {
            Vec::new()
        };

        self.ctx.print(&format!("Formatting {}...", volume.display()));
        self.ctx.ui.set_background(Background::Erasing);
        self.ctx.ui.set_progress(Progress::Indeterminate);

        if let Err(e) = self.ctx.volumes.ensure_unmounted(volume) {
            self.ctx.log.failure("unmount before format", &e);
        }

        let ok = if is_data && self.ctx.reason.as_deref() == Some(CONVERT_FBE_REASON) {
            self.leave_convert_fbe_breadcrumb();
            true
        } else {
            match self.ctx.volumes.format(volume) {
                Ok(()) => true,
                Err(e) => {
                    self.ctx.log.failure("format", &e);
                    false
                }
            }
        };

        if is_cache {
            self.restore_logs(&log_dir, &saved);
        }

        self.ctx.log.event(RecoveryEvent::VolumeWiped {
            volume: volume.display().to_string(),
            ok,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
        ok
    }

    fn leave_convert_fbe_breadcrumb(&mut self) {
        let dir = self.ctx.config.paths.convert_fbe_dir.clone();
        let file = self.ctx.config.paths.convert_fbe_file();
        if let Err(e) = DirBuilder::new().mode(0o700).create(&dir)
            && e.kind() != io::ErrorKind::AlreadyExists
        {
            self.ctx
                .print(&format!("Failed to make convert_fbe dir {e}"));
            return;
        }
        if let Err(e) = File::create(&file) {
            self.ctx
                .print(&format!("Failed to convert to file encryption {e}"));
            return;
        }
        self.ctx
            .log
            .info(format!("left breadcrumb {}", file.display()));
    }

    fn restore_logs(&mut self, log_dir: &Path, saved: &[SavedLogFile]) {
        let ready = self
            .ctx
            .volumes
            .ensure_mounted(log_dir)
            .and_then(|()| fs::create_dir_all(log_dir).map_err(|e| RecoveryError::io(log_dir, e)));
        match ready {
            Ok(()) => {
                for file in saved {
                    if let Err(e) = file.restore() {
                        self.ctx
                            .log
                            .error(format!("Failed to write to {}: {e}", file.path.display()));
                    }
                }
            }
            Err(e) => self.ctx.log.failure("mount / create log directory", &e),
        }
        // The copied part of the temporary log went with the old filesystem.
        self.ctx.archive.reset_cursor();
        self.ctx.copy_logs();
    }

    /// Factory reset: data, then cache and metadata when present, between the
    /// device's pre and post hooks.
    pub fn wipe_data(&mut self) -> bool {
        self.ctx.modified_flash = true;
        self.ctx.print("\n-- Wiping data...");

        let mut ok = self.ctx.device.pre_wipe_data();
        if ok {
            let data = self.ctx.config.paths.data_root.clone();
            ok &= self.erase_volume(&data);
            if self.ctx.has_cache {
                let cache = self.ctx.config.paths.cache_root.clone();
                ok &= self.erase_volume(&cache);
            }
            let metadata = self.ctx.config.paths.metadata_root.clone();
            if self.ctx.volumes.has_volume(&metadata) {
                ok &= self.erase_volume(&metadata);
            }
        }
        if ok {
            ok &= self.ctx.device.post_wipe_data();
        }
        if ok {
            self.ctx.userdata = UserdataState {
                encrypted: false,
                mountable: false,
            };
        }

        self.ctx.print(if ok {
            "Data wipe complete."
        } else {
            "Data wipe failed."
        });
        ok
    }

    pub fn ask_to_wipe_data(&mut self) -> bool {
        yes_no(
            &mut *self.ctx.ui,
            &mut *self.ctx.device,
            "Wipe all user data?",
            IRREVERSIBLE,
        )
    }

    pub fn wipe_cache(&mut self, confirm: bool) -> bool {
        if !self.ctx.has_cache {
            self.ctx.print("No /cache partition found.");
            return false;
        }
        if confirm
            && !yes_no(
                &mut *self.ctx.ui,
                &mut *self.ctx.device,
                "Wipe cache?",
                IRREVERSIBLE,
            )
        {
            return false;
        }
        self.ctx.modified_flash = true;

        self.ctx.print("\n-- Wiping cache...");
        let cache = self.ctx.config.paths.cache_root.clone();
        let ok = self.erase_volume(&cache);
        self.ctx.print(if ok {
            "Cache wipe complete."
        } else {
            "Cache wipe failed."
        });
        ok
    }

    pub fn wipe_system(&mut self, confirm: bool) -> bool {
        if confirm
            && !yes_no(
                &mut *self.ctx.ui,
                &mut *self.ctx.device,
                "Wipe system?",
                IRREVERSIBLE,
            )
        {
            return false;
        }
        self.ctx.modified_flash = true;

        self.ctx.print("\n-- Wiping system...");
        let system = self.ctx.config.paths.system_root.clone();
        let ok = self.erase_volume(&system);
        self.ctx.print(if ok {
            "System wipe complete."
        } else {
            "System wipe failed."
        });
        ok
    }

    /// Verify the staged brick package, then secure-wipe every partition in
    /// the manifest. Individual partition failures do not fail the wipe.
    pub fn wipe_ab_device(&mut self, package_size: u64) -> bool {
        self.ctx.ui.set_background(Background::Erasing);
        self.ctx.ui.set_progress(Progress::Indeterminate);

        let accepted = check_wipe_package(
            package_size,
            self.ctx.services.staging.as_ref(),
            self.ctx.services.verifier.as_ref(),
            self.ctx.props.as_ref(),
            &self.ctx.log,
        );
        if !accepted {
            self.ctx.log.error("Failed to verify wipe package");
            return false;
        }

        let manifest = self.ctx.config.paths.wipe_manifest.clone();
        let raw = match fs::read_to_string(&manifest) {
            Ok(raw) => raw,
            Err(e) => {
                self.ctx
                    .log
                    .failure("read wipe manifest", &RecoveryError::io(&manifest, e));
                return false;
            }
        };

        for partition in parse_wipe_manifest(&raw) {
            match self.ctx.services.partitions.open(&partition) {
                Ok(mut target) => {
                    secure_wipe_partition(target.as_mut(), &partition, &self.ctx.log);
                }
                Err(e) => {
                    self.ctx
                        .log
                        .error(format!("Failed to open \"{partition}\": {e}"));
                    self.ctx.log.event(RecoveryEvent::PartitionWiped {
                        partition,
                        method: "none".to_string(),
                        ok: false,
                    });
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testbed::Testbed;
    use crate::ui::device::keys::{KEY_DOWN, KEY_ENTER};
    use crate::ui::screen::ScriptedUi;
    use crate::wipe::ab::{MemoryStaging, ScriptedVerifier};
    use crate::wipe::secure::{FakeCapabilities, FakePartitions};
    use std::sync::Arc;

    #[test]
    fn snapshot_takes_only_log_files_and_caps_them() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("log"), vec![b'a'; 100]).unwrap();
        fs::write(dir.path().join("last_log"), b"previous").unwrap();
        fs::write(dir.path().join("command"), b"--wipe_cache").unwrap();
        fs::write(dir.path().join("blast_log"), b"x").unwrap();

        let saved = snapshot_logs(dir.path(), 10, &LogHandle::capture());
        let names: Vec<_> = saved
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["last_log", "log"]);
        assert_eq!(saved[1].data.len(), 10);
    }

    #[test]
    fn cache_erase_preserves_logs() {
        let (_dir, tb) = Testbed::temp();
        let log_dir = &tb.config.paths.log_dir;
        fs::create_dir_all(log_dir).unwrap();
        let content: Vec<u8> = (0..4096).map(|_| rand::random::<u8>()).collect();
        fs::write(&tb.config.paths.temporary_log, b"earlier session\n").unwrap();
        fs::write(tb.config.paths.cache_root.join("junk.zip"), b"pk").unwrap();

        let mut ctx = tb.context();
        ctx.archive.persist(&ctx.log);
        assert!(ctx.archive.cursor() > 0);
        fs::write(log_dir.join("last_install"), &content).unwrap();
        fs::set_permissions(log_dir.join("last_install"), fs::Permissions::from_mode(0o640))
            .unwrap();
        let before = fs::metadata(log_dir.join("last_install")).unwrap();
        assert!(WipeOrchestrator::new(&mut ctx).erase_volume(&tb.config.paths.cache_root));

        assert!(!tb.config.paths.cache_root.join("junk.zip").exists());
        let restored = log_dir.join("last_install");
        assert_eq!(fs::read(&restored).unwrap(), content);
        let after = fs::metadata(&restored).unwrap();
        assert_eq!(after.mode() & 0o777, 0o640);
        assert_eq!((after.uid(), after.gid()), (before.uid(), before.gid()));
        assert_eq!(ctx.archive.cursor(), 0);
        assert!(tb.volumes.history().iter().any(|op| op.starts_with("format")));
    }

    #[test]
    fn convert_fbe_skips_format() {
        let (_dir, tb) = Testbed::temp();
        fs::write(tb.config.paths.data_root.join("user.db"), b"keep").unwrap();
        let mut ctx = tb.context();
        ctx.reason = Some(CONVERT_FBE_REASON.to_string());

        assert!(WipeOrchestrator::new(&mut ctx).erase_volume(&tb.config.paths.data_root));
        assert!(tb.config.paths.data_root.join("user.db").exists());
        assert!(tb.config.paths.convert_fbe_file().exists());
        assert_eq!(
            fs::metadata(&tb.config.paths.convert_fbe_dir).unwrap().mode() & 0o777,
            0o700
        );
    }

    #[test]
    fn wipe_data_erases_all_and_reports_failures() {
        let (_dir, tb) = Testbed::temp();
        let mut ctx = tb.context();
        assert!(WipeOrchestrator::new(&mut ctx).wipe_data());
        assert!(ctx.modified_flash);
        assert!(!ctx.userdata.encrypted);
        let formats: Vec<_> = tb
            .volumes
            .history()
            .into_iter()
            .filter(|op| op.starts_with("format"))
            .collect();
        assert_eq!(formats.len(), 3);
        assert!(ctx.log.contains("Data wipe complete."));

        let (_dir, tb) = Testbed::temp();
        tb.volumes.fail_format(&tb.config.paths.metadata_root);
        let mut ctx = tb.context();
        assert!(!WipeOrchestrator::new(&mut ctx).wipe_data());
        assert!(ctx.userdata.encrypted);
        assert!(ctx.log.contains("Data wipe failed."));
    }

    #[test]
    fn wipe_cache_without_cache_or_confirmation() {
        let (_dir, tb) = Testbed::temp_without_cache();
        let mut ctx = tb.context();
        assert!(!WipeOrchestrator::new(&mut ctx).wipe_cache(false));
        assert!(ctx.log.contains("No /cache partition found."));
        assert!(!ctx.modified_flash);

        let (_dir, tb) = Testbed::temp();
        let mut ctx = tb.context();
        ctx.ui = Box::new(ScriptedUi::keys([KEY_ENTER]).with_text_visible());
        assert!(!WipeOrchestrator::new(&mut ctx).wipe_cache(true));
        assert!(!ctx.modified_flash);

        ctx.ui = Box::new(ScriptedUi::keys([KEY_DOWN, KEY_ENTER]).with_text_visible());
        assert!(WipeOrchestrator::new(&mut ctx).wipe_cache(true));
        assert!(ctx.log.contains("Cache wipe complete."));
    }

    #[test]
    fn wipe_ab_continues_past_partition_failures() {
        let (_dir, mut tb) = Testbed::temp();
        fs::write(&tb.config.paths.wipe_manifest, "# wipe\nsystem_a\nmissing\nvendor_a\n").unwrap();
        tb.verifier = Arc::new(ScriptedVerifier::accepting(
            "ota-type=BRICK\npre-device=generic\n",
        ));
        tb.staging = Arc::new(MemoryStaging {
            bytes: vec![1; 32],
        });
        let secure = FakeCapabilities {
            secure_discard: true,
            ..FakeCapabilities::default()
        };
        let partitions = Arc::new(
            FakePartitions::new()
                .with("system_a", 128, secure)
                .with("vendor_a", 128, FakeCapabilities::default()),
        );
        tb.partitions = partitions.clone();

        let mut ctx = tb.context();
        assert!(WipeOrchestrator::new(&mut ctx).wipe_ab_device(32));
        assert_eq!(
            partitions.calls(),
            vec![
                "open system_a",
                "secdiscard 0+128",
                "open vendor_a",
                "secdiscard 0+128",
                "zeroout 0+128",
            ]
        );
        assert!(ctx.log.contains("Failed to open \"missing\""));
    }

    #[test]
    fn wipe_ab_rejects_foreign_product() {
        let (_dir, mut tb) = Testbed::temp();
        fs::write(&tb.config.paths.wipe_manifest, "system_a\n").unwrap();
        tb.verifier = Arc::new(ScriptedVerifier::accepting(
            "ota-type=BRICK\npre-device=other\n",
        ));
        tb.staging = Arc::new(MemoryStaging { bytes: vec![1; 8] });
        let partitions = Arc::new(FakePartitions::new());
        tb.partitions = partitions.clone();

        let mut ctx = tb.context();
        assert!(!WipeOrchestrator::new(&mut ctx).wipe_ab_device(8));
        assert!(partitions.calls().is_empty());
    }
}

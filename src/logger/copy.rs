//! Persisting the session log into the cache log directory.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::config::Config;
use crate::core::errors::{RecoveryError, Result};
use crate::logger::rotate::rotate_logs;
use crate::logger::session::LogHandle;

/// Uid/gid the running system uses to read recovery logs.
pub const AID_SYSTEM: u32 = 1000;

/// Where the temporary logs go and how many generations to keep.
#[derive(Debug, Clone)]
pub struct ArchivePaths {
    pub temporary_log: PathBuf,
    pub temporary_install: PathBuf,
    pub log_file: PathBuf,
    pub last_log: PathBuf,
    pub last_kmsg: PathBuf,
    pub last_install: PathBuf,
    pub keep_log_count: u32,
}

impl ArchivePaths {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            temporary_log: config.paths.temporary_log.clone(),
            temporary_install: config.paths.temporary_install.clone(),
            log_file: config.paths.log_file(),
            last_log: config.paths.last_log(),
            last_kmsg: config.paths.last_kmsg(),
            last_install: config.paths.last_install(),
            keep_log_count: config.logging.keep_log_count,
        }
    }
}

/// Incremental copier of the temporary log.
///
/// `cursor` is how much of the temporary log has already been appended to the
/// persistent `log`; it is reset when the cache volume is reformatted.
#[derive(Debug)]
pub struct LogArchive {
    paths: ArchivePaths,
    cursor: u64,
    rotated: bool,
}

impl LogArchive {
    #[must_use]
    pub fn new(paths: ArchivePaths) -> Self {
        Self {
            paths,
            cursor: 0,
            rotated: false,
        }
    }

    #[must_use]
    pub fn paths(&self) -> &ArchivePaths {
        &self.paths
    }

    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Restart incremental copies from the beginning of the temporary log.
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Copy the session's logs into the log directory.
    ///
    /// Generations are rotated on the first call of a session only; later calls
    /// refresh the same `last_log`.
    pub fn persist(&mut self, log: &LogHandle) {
        log.flush();

        if !self.rotated {
            rotate_logs(
                &self.paths.last_log,
                &self.paths.last_kmsg,
                self.paths.keep_log_count,
            );
            self.rotated = true;
        }

        match append_from(&self.paths.temporary_log, &self.paths.log_file, self.cursor) {
            Ok(end) => self.cursor = end,
            Err(e) => log.failure("copy session log", &e),
        }
        if let Err(e) = overwrite_with(&self.paths.temporary_log, &self.paths.last_log) {
            log.failure("copy last_log", &e);
        }
        if let Err(e) = overwrite_with(&self.paths.temporary_install, &self.paths.last_install) {
            log.failure("copy last_install", &e);
        }
        if let Err(e) = save_kernel_log(&self.paths.last_kmsg) {
            log.failure("save kernel log", &e);
        }

        for (path, mode, system_owned) in [
            (&self.paths.log_file, 0o600, true),
            (&self.paths.last_kmsg, 0o600, true),
            (&self.paths.last_log, 0o640, false),
            (&self.paths.last_install, 0o644, false),
        ] {
            if !path.exists() {
                continue;
            }
            if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
                log.warn(format!("chmod {} failed: {e}", path.display()));
            }
            if system_owned {
                let id = nix::unistd::Uid::from_raw(AID_SYSTEM);
                let gid = nix::unistd::Gid::from_raw(AID_SYSTEM);
                if let Err(e) = nix::unistd::chown(path.as_path(), Some(id), Some(gid)) {
                    log.warn(format!("chown {} failed: {e}", path.display()));
                }
            }
        }

        nix::unistd::sync();
    }
}

/// Append `source[offset..]` to `dest`; returns the new offset.
pub fn append_from(source: &Path, dest: &Path, offset: u64) -> Result<u64> {
    let mut src = match File::open(source) {
        Ok(file) => file,
        // Nothing logged yet.
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(offset),
        Err(e) => return Err(RecoveryError::io(source, e)),
    };
    let len = src
        .metadata()
        .map_err(|e| RecoveryError::io(source, e))?
        .len();
    // The temporary log was truncated underneath us; start over.
    let start = if offset > len { 0 } else { offset };
    src.seek(SeekFrom::Start(start))
        .map_err(|e| RecoveryError::io(source, e))?;

    let mut dst = open_for_write(dest, true)?;
    let copied = io::copy(&mut src, &mut dst).map_err(|e| RecoveryError::io(dest, e))?;
    dst.flush().map_err(|e| RecoveryError::io(dest, e))?;
    Ok(start + copied)
}

/// Replace `dest` with the full content of `source` (no-op when `source` is missing).
pub fn overwrite_with(source: &Path, dest: &Path) -> Result<()> {
    let mut src = match File::open(source) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(RecoveryError::io(source, e)),
    };
    let mut dst = open_for_write(dest, false)?;
    let mut buf = Vec::new();
    src.read_to_end(&mut buf)
        .map_err(|e| RecoveryError::io(source, e))?;
    dst.write_all(&buf).map_err(|e| RecoveryError::io(dest, e))?;
    Ok(())
}

/// Dump the kernel ring buffer into `dest`.
pub fn save_kernel_log(dest: &Path) -> Result<()> {
    let output = Command::new("dmesg")
        .output()
        .map_err(|e| RecoveryError::io("dmesg", e))?;
    if !output.status.success() {
        return Err(RecoveryError::Fatal {
            details: format!("dmesg exited with {}", output.status),
        });
    }
    let mut dst = open_for_write(dest, false)?;
    dst.write_all(&output.stdout)
        .map_err(|e| RecoveryError::io(dest, e))
}

fn open_for_write(path: &Path, append: bool) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RecoveryError::io(parent, e))?;
    }
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path).map_err(|e| RecoveryError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::rotate::generation_path;

    fn paths_in(dir: &Path) -> ArchivePaths {
        ArchivePaths {
            temporary_log: dir.join("tmp/recovery.log"),
            temporary_install: dir.join("tmp/last_install"),
            log_file: dir.join("cache/recovery/log"),
            last_log: dir.join("cache/recovery/last_log"),
            last_kmsg: dir.join("cache/recovery/last_kmsg"),
            last_install: dir.join("cache/recovery/last_install"),
            keep_log_count: 3,
        }
    }

    #[test]
    fn append_from_tracks_offset() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.log");
        let dst = dir.path().join("dst.log");
        fs::write(&src, "first\n").unwrap();

        let offset = append_from(&src, &dst, 0).unwrap();
        assert_eq!(offset, 6);

        let mut file = OpenOptions::new().append(true).open(&src).unwrap();
        file.write_all(b"second\n").unwrap();
        let offset = append_from(&src, &dst, offset).unwrap();
        assert_eq!(offset, 13);

        assert_eq!(fs::read_to_string(&dst).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn append_from_restarts_after_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.log");
        let dst = dir.path().join("dst.log");
        fs::write(&src, "abc").unwrap();
        let offset = append_from(&src, &dst, 100).unwrap();
        assert_eq!(offset, 3);
        assert_eq!(fs::read_to_string(&dst).unwrap(), "abc");
    }

    #[test]
    fn overwrite_ignores_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("last_install");
        overwrite_with(&dir.path().join("missing"), &dst).unwrap();
        assert!(!dst.exists());
    }

    #[test]
    fn persist_copies_and_sets_modes() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        fs::create_dir_all(paths.temporary_log.parent().unwrap()).unwrap();
        fs::write(&paths.temporary_log, "[    0.000000] I:Starting recovery\n").unwrap();
        fs::write(&paths.temporary_install, "/cache/a.zip\n1\n").unwrap();

        let log = LogHandle::capture();
        let mut archive = LogArchive::new(paths.clone());
        archive.persist(&log);

        assert_eq!(
            fs::read_to_string(&paths.last_log).unwrap(),
            "[    0.000000] I:Starting recovery\n"
        );
        assert_eq!(fs::read_to_string(&paths.log_file).unwrap().lines().count(), 1);
        assert_eq!(
            fs::read_to_string(&paths.last_install).unwrap(),
            "/cache/a.zip\n1\n"
        );
        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&paths.log_file), 0o600);
        assert_eq!(mode(&paths.last_log), 0o640);
        assert_eq!(mode(&paths.last_install), 0o644);
        assert_eq!(archive.cursor(), 35);
    }

    #[test]
    fn persist_rotates_once_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        fs::create_dir_all(paths.last_log.parent().unwrap()).unwrap();
        fs::create_dir_all(paths.temporary_log.parent().unwrap()).unwrap();
        fs::write(&paths.last_log, "previous session").unwrap();
        fs::write(&paths.temporary_log, "this session\n").unwrap();

        let log = LogHandle::capture();
        let mut archive = LogArchive::new(paths.clone());
        archive.persist(&log);
        archive.persist(&log);

        assert_eq!(
            fs::read_to_string(generation_path(&paths.last_log, 1)).unwrap(),
            "previous session"
        );
        assert!(!generation_path(&paths.last_log, 2).exists());
        // The cursor prevents the second call from duplicating the log.
        assert_eq!(
            fs::read_to_string(&paths.log_file).unwrap(),
            "this session\n"
        );
    }

    #[test]
    fn reset_cursor_recopies_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        fs::create_dir_all(paths.temporary_log.parent().unwrap()).unwrap();
        fs::write(&paths.temporary_log, "line\n").unwrap();

        let log = LogHandle::capture();
        let mut archive = LogArchive::new(paths.clone());
        archive.persist(&log);
        fs::remove_file(&paths.log_file).unwrap();
        archive.reset_cursor();
        archive.persist(&log);

        assert_eq!(fs::read_to_string(&paths.log_file).unwrap(), "line\n");
    }
}

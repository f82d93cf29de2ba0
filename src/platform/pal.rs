//! Platform collaborators: volume table, mount state, and system properties.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{RecoveryError, Result};

/// One entry of the device volume table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub mount_point: PathBuf,
    pub device: String,
    pub fs_type: String,
    /// Human label shown in "Choose from <label>".
    pub label: String,
    /// Removable or emulated storage offered in the apply-update menu.
    pub is_storage: bool,
}

/// Mount-point metadata parsed from `/proc/self/mounts`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountPoint {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
}

/// Volume enumerate/mount/unmount/format contract.
pub trait VolumeManager: Send + Sync {
    /// Volume whose mount point is `mount_point` exactly.
    fn volume_for_mount_point(&self, mount_point: &Path) -> Option<Volume>;
    /// Mount the volume containing `path`.
    fn ensure_mounted(&self, path: &Path) -> Result<()>;
    /// Unmount the volume containing `path`.
    fn ensure_unmounted(&self, path: &Path) -> Result<()>;
    /// Reformat the volume mounted at `mount_point`; it is left unmounted.
    fn format(&self, mount_point: &Path) -> Result<()>;
    /// Storage volumes a package can be picked from.
    fn storage_volumes(&self) -> Vec<Volume>;
    /// Unmount every volume this manager mounted.
    fn unmount_all(&self);

    fn has_volume(&self, mount_point: &Path) -> bool {
        self.volume_for_mount_point(mount_point).is_some()
    }
}

/// System property access.
pub trait PropertyStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).as_deref().map(str::trim) {
            Some("1" | "y" | "yes" | "on" | "true") => true,
            Some("0" | "n" | "no" | "off" | "false") => false,
            _ => default,
        }
    }
}

// ──────────────────── fstab-backed volumes ────────────────────

/// Volume manager over a `device mount_point fs_type [flags]` table.
#[derive(Debug)]
pub struct FstabVolumes {
    volumes: Vec<Volume>,
    mounted_by_us: Mutex<HashSet<PathBuf>>,
}

impl FstabVolumes {
    pub fn load(table: &Path) -> Result<Self> {
        let raw = fs::read_to_string(table).map_err(|e| RecoveryError::io(table, e))?;
        Ok(Self::from_table(&raw))
    }

    #[must_use]
    pub fn from_table(raw: &str) -> Self {
        Self {
            volumes: parse_volume_table(raw),
            mounted_by_us: Mutex::new(HashSet::new()),
        }
    }

    fn volume_containing(&self, path: &Path) -> Result<&Volume> {
        self.volumes
            .iter()
            .filter(|volume| path.starts_with(&volume.mount_point))
            .max_by_key(|volume| volume.mount_point.as_os_str().len())
            .ok_or_else(|| RecoveryError::volume(path, "no volume for path"))
    }

    fn is_mounted(mount_point: &Path) -> Result<bool> {
        let raw = fs::read_to_string("/proc/self/mounts")
            .map_err(|e| RecoveryError::io("/proc/self/mounts", e))?;
        Ok(parse_proc_mounts(&raw)
            .iter()
            .any(|mount| mount.path == mount_point))
    }
}

impl VolumeManager for FstabVolumes {
    fn volume_for_mount_point(&self, mount_point: &Path) -> Option<Volume> {
        self.volumes
            .iter()
            .find(|volume| volume.mount_point == mount_point)
            .cloned()
    }

    fn ensure_mounted(&self, path: &Path) -> Result<()> {
        let volume = self.volume_containing(path)?;
        if Self::is_mounted(&volume.mount_point)? {
            return Ok(());
        }
        fs::create_dir_all(&volume.mount_point)
            .map_err(|e| RecoveryError::io(&volume.mount_point, e))?;
        run_tool(
            &volume.mount_point,
            Command::new("mount")
                .arg("-t")
                .arg(&volume.fs_type)
                .arg(&volume.device)
                .arg(&volume.mount_point),
        )?;
        self.mounted_by_us.lock().insert(volume.mount_point.clone());
        Ok(())
    }

    fn ensure_unmounted(&self, path: &Path) -> Result<()> {
        let volume = self.volume_containing(path)?;
        if !Self::is_mounted(&volume.mount_point)? {
            return Ok(());
        }
        run_tool(
            &volume.mount_point,
            Command::new("umount").arg(&volume.mount_point),
        )?;
        self.mounted_by_us.lock().remove(&volume.mount_point);
        Ok(())
    }

    fn format(&self, mount_point: &Path) -> Result<()> {
        let volume = self
            .volume_for_mount_point(mount_point)
            .ok_or_else(|| RecoveryError::volume(mount_point, "unknown volume"))?;
        self.ensure_unmounted(mount_point)?;
        let mut command = match volume.fs_type.as_str() {
            "ext4" => {
                let mut c = Command::new("mke2fs");
                c.args(["-F", "-t", "ext4"]).arg(&volume.device);
                c
            }
            "f2fs" => {
                let mut c = Command::new("make_f2fs");
                c.arg(&volume.device);
                c
            }
            other => {
                return Err(RecoveryError::volume(
                    mount_point,
                    format!("unsupported fs_type {other}"),
                ));
            }
        };
        run_tool(mount_point, &mut command)
    }

    fn storage_volumes(&self) -> Vec<Volume> {
        self.volumes
            .iter()
            .filter(|volume| volume.is_storage)
            .cloned()
            .collect()
    }

    fn unmount_all(&self) {
        let mounted: Vec<PathBuf> = self.mounted_by_us.lock().iter().cloned().collect();
        for mount_point in mounted {
            let _ = self.ensure_unmounted(&mount_point);
        }
    }
}

fn run_tool(volume: &Path, command: &mut Command) -> Result<()> {
    let output = command.output().map_err(|e| RecoveryError::io(volume, e))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(RecoveryError::volume(
            volume,
            format!(
                "{:?} failed ({}): {}",
                command.get_program(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ))
    }
}

/// Parse a volume table; `#` comments and short lines are skipped.
#[must_use]
pub fn parse_volume_table(raw: &str) -> Vec<Volume> {
    let mut volumes = Vec::new();
    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        let mount_point = PathBuf::from(fields[1]);
        let flags = fields.get(3).copied().unwrap_or_default();
        let is_storage = flags.split(',').any(|flag| flag.starts_with("voldmanaged"))
            || matches!(fields[2], "vfat" | "exfat" | "sdcardfs");
        volumes.push(Volume {
            label: volume_label(&mount_point),
            mount_point,
            device: fields[0].to_string(),
            fs_type: fields[2].to_string(),
            is_storage,
        });
    }
    volumes
}

fn volume_label(mount_point: &Path) -> String {
    mount_point
        .file_name()
        .map_or_else(|| "root".to_string(), |name| name.to_string_lossy().into_owned())
}

/// Parse `/proc/self/mounts`; malformed lines are skipped.
#[must_use]
pub fn parse_proc_mounts(raw: &str) -> Vec<MountPoint> {
    raw.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            (fields.len() >= 3).then(|| MountPoint {
                path: unescape_mount_path(fields[1]),
                device: fields[0].to_string(),
                fs_type: fields[2].to_string(),
            })
        })
        .collect()
}

/// Decode octal escape sequences (`\NNN`) used by the Linux kernel.
fn unescape_mount_path(raw: &str) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;

    let mut bytes = Vec::with_capacity(raw.len());
    let raw_bytes = raw.as_bytes();
    let mut i = 0;
    while i < raw_bytes.len() {
        if raw_bytes[i] == b'\\' && i + 3 < raw_bytes.len() {
            let digits = &raw_bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                bytes.push((digits[0] - b'0') * 64 + (digits[1] - b'0') * 8 + (digits[2] - b'0'));
                i += 4;
                continue;
            }
        }
        bytes.push(raw_bytes[i]);
        i += 1;
    }
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

// ──────────────────── directory-backed volumes ────────────────────

/// Volume manager over plain directories: formatting empties the directory.
///
/// Used for host dry runs and tests. Every operation is recorded in `history`.
#[derive(Debug, Default)]
pub struct DirectoryVolumes {
    volumes: Vec<Volume>,
    mounted: Mutex<HashSet<PathBuf>>,
    failing_formats: Mutex<HashSet<PathBuf>>,
    history: Mutex<Vec<String>>,
}

impl DirectoryVolumes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a directory as a volume.
    #[must_use]
    pub fn with_volume(mut self, mount_point: impl Into<PathBuf>, is_storage: bool) -> Self {
        let mount_point = mount_point.into();
        self.volumes.push(Volume {
            label: volume_label(&mount_point),
            device: format!("dir:{}", mount_point.display()),
            fs_type: "dir".to_string(),
            mount_point,
            is_storage,
        });
        self
    }

    /// Make every later `format` of `mount_point` fail.
    pub fn fail_format(&self, mount_point: impl Into<PathBuf>) {
        self.failing_formats.lock().insert(mount_point.into());
    }

    /// Operations performed so far, e.g. `"format /x/cache"`.
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }

    #[must_use]
    pub fn is_mounted(&self, mount_point: &Path) -> bool {
        self.mounted.lock().contains(mount_point)
    }

    fn volume_containing(&self, path: &Path) -> Result<&Volume> {
        self.volumes
            .iter()
            .filter(|volume| path.starts_with(&volume.mount_point))
            .max_by_key(|volume| volume.mount_point.as_os_str().len())
            .ok_or_else(|| RecoveryError::volume(path, "no volume for path"))
    }

    fn record(&self, op: &str, mount_point: &Path) {
        self.history
            .lock()
            .push(format!("{op} {}", mount_point.display()));
    }
}

impl VolumeManager for DirectoryVolumes {
    fn volume_for_mount_point(&self, mount_point: &Path) -> Option<Volume> {
        self.volumes
            .iter()
            .find(|volume| volume.mount_point == mount_point)
            .cloned()
    }

    fn ensure_mounted(&self, path: &Path) -> Result<()> {
        let volume = self.volume_containing(path)?;
        if self.mounted.lock().insert(volume.mount_point.clone()) {
            fs::create_dir_all(&volume.mount_point)
                .map_err(|e| RecoveryError::io(&volume.mount_point, e))?;
            self.record("mount", &volume.mount_point);
        }
        Ok(())
    }

    fn ensure_unmounted(&self, path: &Path) -> Result<()> {
        let volume = self.volume_containing(path)?;
        if self.mounted.lock().remove(&volume.mount_point) {
            self.record("umount", &volume.mount_point);
        }
        Ok(())
    }

    fn format(&self, mount_point: &Path) -> Result<()> {
        if !self.has_volume(mount_point) {
            return Err(RecoveryError::volume(mount_point, "unknown volume"));
        }
        self.ensure_unmounted(mount_point)?;
        self.record("format", mount_point);
        if self.failing_formats.lock().contains(mount_point) {
            return Err(RecoveryError::volume(mount_point, "format failed"));
        }
        let entries = match fs::read_dir(mount_point) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(RecoveryError::io(mount_point, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| RecoveryError::io(mount_point, e))?;
            let path = entry.path();
            let removed = if entry.file_type().is_ok_and(|t| t.is_dir()) {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| RecoveryError::io(&path, e))?;
        }
        Ok(())
    }

    fn storage_volumes(&self) -> Vec<Volume> {
        self.volumes
            .iter()
            .filter(|volume| volume.is_storage)
            .cloned()
            .collect()
    }

    fn unmount_all(&self) {
        let mounted: Vec<PathBuf> = self.mounted.lock().drain().collect();
        for mount_point in mounted {
            self.record("umount", &mount_point);
        }
    }
}

// ──────────────────── properties ────────────────────

/// Properties through the `getprop`/`setprop` tools.
#[derive(Debug, Default)]
pub struct SystemProperties;

impl PropertyStore for SystemProperties {
    fn get(&self, key: &str) -> Option<String> {
        let output = Command::new("getprop").arg(key).output().ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let status = Command::new("setprop")
            .arg(key)
            .arg(value)
            .status()
            .map_err(|e| RecoveryError::io("setprop", e))?;
        if status.success() {
            Ok(())
        } else {
            Err(RecoveryError::Fatal {
                details: format!("setprop {key} exited with {status}"),
            })
        }
    }
}

/// In-memory property map for tests and host runs.
#[derive(Debug, Default)]
pub struct StaticProperties {
    values: Mutex<HashMap<String, String>>,
}

impl StaticProperties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, key: &str, value: &str) -> Self {
        self.values.lock().insert(key.to_string(), value.to_string());
        self
    }
}

impl PropertyStore for StaticProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

//! JSONL event stream: one self-contained JSON object per session milestone.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! reader tailing the file never sees a partial record.
//!
//! Four-level fallback chain:
//! 1. Primary file path (the temporary event log)
//! 2. Fallback path, when configured
//! 3. stderr with `[RCV-JSONL]` prefix
//! 4. Silent discard (a logging failure never stops a wipe or install)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{RecoveryError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Session milestones recorded in the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    ArgsResolved,
    ControlBlockWrite,
    ControlBlockClear,
    VolumeWipe,
    PartitionWipe,
    InstallAttempt,
    RetryScheduled,
    SessionFinalize,
    Error,
}

/// A single JSONL log entry; only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Package, volume, or partition path involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Pending arguments at the time of the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Where the arguments came from, or which discard method ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Install outcome label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// RCV error code if the step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            path: None,
            args: None,
            source: None,
            attempt: None,
            result: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Degradation state of the JSONL writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Fallback,
    Stderr,
    Discard,
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Maximum file size before rotation (bytes).
    pub max_size_bytes: u64,
    /// Number of rotated files to keep.
    pub max_rotated_files: u32,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/recovery.jsonl"),
            fallback_path: None,
            max_size_bytes: 4 * 1024 * 1024,
            max_rotated_files: 2,
        }
    }
}

/// Append-only JSONL log writer with rotation and multi-level fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
}

impl JsonlWriter {
    /// Open the JSONL log file. Falls through the degradation chain on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
        };
        w.try_open_primary();
        w
    }

    /// Write a single log entry as one JSONL line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[RCV-JSONL] serialize error: {e}");
                return;
            }
        };

        self.write_line(&line);
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    /// Flush and fsync the underlying file.
    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Fallback => "fallback",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    // ──────────────────────── internals ────────────────────────

    fn write_line(&mut self, line: &str) {
        if self.bytes_written + line.len() as u64 > self.config.max_size_bytes
            && matches!(self.state, WriterState::Normal | WriterState::Fallback)
        {
            self.rotate();
        }

        match self.state {
            WriterState::Normal | WriterState::Fallback => {
                if let Some(w) = self.writer.as_mut() {
                    if w.write_all(line.as_bytes()).is_err() {
                        self.degrade();
                        self.write_line(line);
                        return;
                    }
                    self.bytes_written += line.len() as u64;
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                let _ = write!(io::stderr(), "[RCV-JSONL] {line}");
            }
            WriterState::Discard => {}
        }
    }

    fn try_open_primary(&mut self) {
        match open_append(&self.config.path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::with_capacity(16 * 1024, file));
                self.state = WriterState::Normal;
                self.bytes_written = size;
            }
            Err(_) => self.try_open_fallback(),
        }
    }

    fn try_open_fallback(&mut self) {
        let Some(fb) = &self.config.fallback_path else {
            self.state = WriterState::Stderr;
            let _ = writeln!(
                io::stderr(),
                "[RCV-JSONL] primary path failed and no fallback configured, using stderr"
            );
            return;
        };
        match open_append(fb) {
            Ok((file, size)) => {
                let _ = writeln!(
                    io::stderr(),
                    "[RCV-JSONL] primary path failed, using fallback: {}",
                    fb.display()
                );
                self.writer = Some(BufWriter::with_capacity(16 * 1024, file));
                self.state = WriterState::Fallback;
                self.bytes_written = size;
            }
            Err(_) => {
                self.state = WriterState::Stderr;
                let _ = writeln!(
                    io::stderr(),
                    "[RCV-JSONL] both primary and fallback paths failed, using stderr"
                );
            }
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        match self.state {
            WriterState::Normal => self.try_open_fallback(),
            WriterState::Fallback => {
                self.state = WriterState::Stderr;
                let _ = writeln!(io::stderr(), "[RCV-JSONL] fallback write failed, using stderr");
            }
            WriterState::Stderr => self.state = WriterState::Discard,
            WriterState::Discard => {}
        }
    }

    fn rotate(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;

        let base = match self.state {
            WriterState::Normal => self.config.path.clone(),
            WriterState::Fallback => match &self.config.fallback_path {
                Some(p) => p.clone(),
                None => return,
            },
            _ => return,
        };

        crate::logger::rotate::shift_generations(&base, self.config.max_rotated_files);

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::with_capacity(16 * 1024, file));
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create a file for appending. Returns `(File, current_size)`.
pub(crate) fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| RecoveryError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| RecoveryError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// Best-effort rename used by rotation; a missing source is not an error.
pub(crate) fn rename_if_present(from: &Path, to: &Path) {
    let _ = rename(from, to);
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::rotate::generation_path;

    fn config_at(path: PathBuf, max_size_bytes: u64) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes,
            max_rotated_files: 3,
        }
    }

    #[test]
    fn write_entry_produces_valid_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone(), 1024 * 1024));

        let mut entry = LogEntry::new(EventType::ControlBlockWrite, Severity::Info);
        entry.args = Some(vec!["--wipe_cache".to_string()]);
        writer.write_entry(&entry);
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["event"], "control_block_write");
        assert_eq!(parsed["severity"], "info");
        assert_eq!(parsed["args"][0], "--wipe_cache");
    }

    #[test]
    fn rotation_shifts_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone(), 100));

        for _ in 0..10 {
            writer.write_entry(&LogEntry::new(EventType::PartitionWipe, Severity::Info));
        }
        writer.flush();

        assert!(path.exists());
        assert!(generation_path(&path, 1).exists());
        assert!(!generation_path(&path, 4).exists());
    }

    #[test]
    fn fallback_when_primary_dir_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"x").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let config = JsonlConfig {
            path: blocker.join("primary.jsonl"),
            fallback_path: Some(fallback.clone()),
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 3,
        };
        let mut writer = JsonlWriter::open(config);

        assert_eq!(writer.state(), "fallback");
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Warning));
        writer.flush();

        assert!(!fs::read_to_string(&fallback).unwrap().is_empty());
    }

    #[test]
    fn stderr_when_no_path_usable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let writer = JsonlWriter::open(config_at(blocker.join("events.jsonl"), 1024));
        assert_eq!(writer.state(), "stderr");
    }

    #[test]
    fn optional_fields_omitted_when_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone(), 1024 * 1024));

        writer.write_entry(&LogEntry::new(EventType::SessionStart, Severity::Info));
        writer.flush();

        let line = fs::read_to_string(&path).unwrap();
        assert!(!line.contains("\"path\""));
        assert!(!line.contains("\"args\""));
        assert!(!line.contains("\"attempt\""));
    }
}

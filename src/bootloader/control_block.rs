//! Control block: the pending-command record that survives reboots.
//!
//! The record is a fixed 2048-byte message (`boot_mode[32]`, `status[32]`,
//! `command[768]`, `stage[32]`, reserved). On disk it is kept in two
//! checksummed slots so a write interrupted by power loss leaves the previous
//! record readable.

#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::core::errors::{RecoveryError, Result};
use crate::logger::session::{LogHandle, RecoveryEvent};

// ──────────────────── layout ────────────────────

pub const MESSAGE_SIZE: usize = 2048;
const BOOT_MODE_LEN: usize = 32;
const STATUS_LEN: usize = 32;
const COMMAND_LEN: usize = 768;
const STAGE_LEN: usize = 32;

const BOOT_MODE_OFFSET: usize = 0;
const STATUS_OFFSET: usize = BOOT_MODE_OFFSET + BOOT_MODE_LEN;
const COMMAND_OFFSET: usize = STATUS_OFFSET + STATUS_LEN;
const STAGE_OFFSET: usize = COMMAND_OFFSET + COMMAND_LEN;

const SLOT_SIZE: usize = 4096;
const SLOT_MAGIC: &[u8; 8] = b"RCVBCB01";
const SEQ_OFFSET: usize = SLOT_MAGIC.len();
const PAYLOAD_OFFSET: usize = SEQ_OFFSET + 8;
const DIGEST_OFFSET: usize = PAYLOAD_OFFSET + MESSAGE_SIZE;
const SLOT_USED: usize = DIGEST_OFFSET + 32;

/// First token of `command` when it carries pending arguments.
pub const RECOVERY_MARKER: &str = "recovery";
/// `boot_mode` value that makes the bootloader start the maintenance mode.
pub const BOOT_RECOVERY: &str = "boot-recovery";

// ──────────────────── record ────────────────────

/// Decoded control-block message. All fields empty means "boot normally".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlBlockRecord {
    pub boot_mode: String,
    pub status: String,
    /// `"recovery\n"` followed by newline-joined arguments.
    pub command: String,
    /// Multi-stage package progress, `N/M`.
    pub stage: String,
}

/// Interpretation of the `command` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingArgs {
    Empty,
    Args(Vec<String>),
    /// Non-empty command without the marker token.
    Malformed(String),
}

impl ControlBlockRecord {
    /// Record asking the next boot to resume `args`.
    #[must_use]
    pub fn pending(args: &[String], status: &str, stage: &str) -> Self {
        let mut command = String::from(RECOVERY_MARKER);
        command.push('\n');
        for arg in args {
            command.push_str(arg);
            command.push('\n');
        }
        Self {
            boot_mode: BOOT_RECOVERY.to_string(),
            status: status.to_string(),
            command,
            stage: stage.to_string(),
        }
    }

    #[must_use]
    pub fn is_clear(&self) -> bool {
        self == &Self::default()
    }

    #[must_use]
    pub fn pending_args(&self) -> PendingArgs {
        if self.command.is_empty() {
            return PendingArgs::Empty;
        }
        let mut tokens = self.command.split('\n');
        if tokens.next() != Some(RECOVERY_MARKER) {
            return PendingArgs::Malformed(self.command.clone());
        }
        PendingArgs::Args(
            tokens
                .filter(|token| !token.is_empty() && !token.starts_with('\0'))
                .map(str::to_string)
                .collect(),
        )
    }

    /// Serialize into the fixed message layout.
    pub fn encode(&self) -> Result<[u8; MESSAGE_SIZE]> {
        let mut message = [0u8; MESSAGE_SIZE];
        put_field(&mut message, BOOT_MODE_OFFSET, BOOT_MODE_LEN, "boot_mode", &self.boot_mode)?;
        put_field(&mut message, STATUS_OFFSET, STATUS_LEN, "status", &self.status)?;
        put_field(&mut message, COMMAND_OFFSET, COMMAND_LEN, "command", &self.command)?;
        put_field(&mut message, STAGE_OFFSET, STAGE_LEN, "stage", &self.stage)?;
        Ok(message)
    }

    #[must_use]
    pub fn decode(message: &[u8; MESSAGE_SIZE]) -> Self {
        Self {
            boot_mode: get_field(message, BOOT_MODE_OFFSET, BOOT_MODE_LEN),
            status: get_field(message, STATUS_OFFSET, STATUS_LEN),
            command: get_field(message, COMMAND_OFFSET, COMMAND_LEN),
            stage: get_field(message, STAGE_OFFSET, STAGE_LEN),
        }
    }
}

fn put_field(
    message: &mut [u8; MESSAGE_SIZE],
    offset: usize,
    len: usize,
    name: &str,
    value: &str,
) -> Result<()> {
    let bytes = value.as_bytes();
    // One byte is kept for the terminating NUL.
    if bytes.len() >= len {
        return Err(RecoveryError::ControlBlock {
            details: format!("{name} is {} bytes, limit {}", bytes.len(), len - 1),
        });
    }
    message[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn get_field(message: &[u8; MESSAGE_SIZE], offset: usize, len: usize) -> String {
    let raw = &message[offset..offset + len];
    let end = memchr::memchr(0, raw).unwrap_or(len);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

// ──────────────────── devices ────────────────────

/// Storage for the control-block record.
pub trait ControlBlockDevice: Send + Sync {
    fn load(&self) -> Result<ControlBlockRecord>;
    /// Durably replace the record; a crash leaves either old or new content.
    fn store(&self, record: &ControlBlockRecord) -> Result<()>;
}

/// Two-slot checksummed control block on a partition or file.
#[derive(Debug, Clone)]
pub struct SlottedControlBlock {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    index: usize,
    seq: u64,
}

impl SlottedControlBlock {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_area(&self) -> Result<Option<Vec<u8>>> {
        let mut file = match OpenOptions::new().read(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RecoveryError::io(&self.path, e)),
        };
        let mut area = Vec::with_capacity(2 * SLOT_SIZE);
        file.by_ref()
            .take((2 * SLOT_SIZE) as u64)
            .read_to_end(&mut area)
            .map_err(|e| RecoveryError::io(&self.path, e))?;
        area.resize(2 * SLOT_SIZE, 0);
        Ok(Some(area))
    }

    fn newest(area: &[u8]) -> Option<(SlotState, [u8; MESSAGE_SIZE])> {
        (0..2)
            .filter_map(|index| {
                let slot = &area[index * SLOT_SIZE..(index + 1) * SLOT_SIZE];
                parse_slot(slot).map(|(seq, message)| (SlotState { index, seq }, message))
            })
            .max_by_key(|(state, _)| state.seq)
    }
}

fn parse_slot(slot: &[u8]) -> Option<(u64, [u8; MESSAGE_SIZE])> {
    if &slot[..SEQ_OFFSET] != SLOT_MAGIC {
        return None;
    }
    let digest = Sha256::digest(&slot[..DIGEST_OFFSET]);
    if digest.as_slice() != &slot[DIGEST_OFFSET..SLOT_USED] {
        return None;
    }
    let seq = u64::from_le_bytes(slot[SEQ_OFFSET..PAYLOAD_OFFSET].try_into().ok()?);
    let message: [u8; MESSAGE_SIZE] = slot[PAYLOAD_OFFSET..DIGEST_OFFSET].try_into().ok()?;
    Some((seq, message))
}

fn build_slot(seq: u64, message: &[u8; MESSAGE_SIZE]) -> Vec<u8> {
    let mut slot = vec![0u8; SLOT_SIZE];
    slot[..SEQ_OFFSET].copy_from_slice(SLOT_MAGIC);
    slot[SEQ_OFFSET..PAYLOAD_OFFSET].copy_from_slice(&seq.to_le_bytes());
    slot[PAYLOAD_OFFSET..DIGEST_OFFSET].copy_from_slice(message);
    let digest = Sha256::digest(&slot[..DIGEST_OFFSET]);
    slot[DIGEST_OFFSET..SLOT_USED].copy_from_slice(&digest);
    slot
}

impl ControlBlockDevice for SlottedControlBlock {
    fn load(&self) -> Result<ControlBlockRecord> {
        let Some(area) = self.read_area()? else {
            return Ok(ControlBlockRecord::default());
        };
        if let Some((_, message)) = Self::newest(&area) {
            return Ok(ControlBlockRecord::decode(&message));
        }
        if area.iter().all(|b| *b == 0) {
            return Ok(ControlBlockRecord::default());
        }
        Err(RecoveryError::ControlBlock {
            details: format!("no valid slot in {}", self.path.display()),
        })
    }

    fn store(&self, record: &ControlBlockRecord) -> Result<()> {
        let message = record.encode()?;
        let newest = self
            .read_area()?
            .and_then(|area| Self::newest(&area).map(|(state, _)| state));
        let (index, seq) = match newest {
            Some(state) => (1 - state.index, state.seq.wrapping_add(1)),
            None => (0, 1),
        };

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| RecoveryError::io(&self.path, e))?;
        file.write_all_at(&build_slot(seq, &message), (index * SLOT_SIZE) as u64)
            .map_err(|e| RecoveryError::io(&self.path, e))?;
        file.sync_data()
            .map_err(|e| RecoveryError::io(&self.path, e))
    }
}

/// Process-local control block with injectable failures.
#[derive(Debug, Default)]
pub struct InMemoryControlBlock {
    record: Mutex<ControlBlockRecord>,
    history: Mutex<Vec<ControlBlockRecord>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryControlBlock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_record(record: ControlBlockRecord) -> Self {
        let block = Self::default();
        *block.record.lock() = record;
        block
    }

    #[must_use]
    pub fn snapshot(&self) -> ControlBlockRecord {
        self.record.lock().clone()
    }

    /// Every record stored so far, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<ControlBlockRecord> {
        self.history.lock().clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl ControlBlockDevice for InMemoryControlBlock {
    fn load(&self) -> Result<ControlBlockRecord> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(RecoveryError::ControlBlock {
                details: "injected read failure".to_string(),
            });
        }
        Ok(self.record.lock().clone())
    }

    fn store(&self, record: &ControlBlockRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(RecoveryError::ControlBlock {
                details: "injected write failure".to_string(),
            });
        }
        record.encode()?;
        *self.record.lock() = record.clone();
        self.history.lock().push(record.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ──────────────────── store ────────────────────

/// Non-fatal read/write/clear of the control block.
#[derive(Clone)]
pub struct ControlBlockStore {
    device: Arc<dyn ControlBlockDevice>,
    log: LogHandle,
}

impl ControlBlockStore {
    #[must_use]
    pub fn new(device: Arc<dyn ControlBlockDevice>, log: LogHandle) -> Self {
        Self { device, log }
    }

    /// Current record, or a zeroed record if it cannot be read.
    #[must_use]
    pub fn read(&self) -> ControlBlockRecord {
        self.device.load().unwrap_or_else(|e| {
            self.log.failure("read bootloader message", &e);
            ControlBlockRecord::default()
        })
    }

    /// Record `args` as the pending command, keeping `status` and `stage`.
    pub fn write_pending(&self, args: &[String]) -> bool {
        let current = self.device.load().unwrap_or_default();
        let record = ControlBlockRecord::pending(args, &current.status, &current.stage);
        let ok = match self.device.store(&record) {
            Ok(()) => true,
            Err(e) => {
                self.log.failure("set bootloader message", &e);
                false
            }
        };
        self.log.event(RecoveryEvent::ControlBlockWritten {
            args: args.to_vec(),
            ok,
        });
        ok
    }

    /// Reset to a normal boot; safe to repeat.
    pub fn clear(&self) -> bool {
        let ok = match self.device.store(&ControlBlockRecord::default()) {
            Ok(()) => true,
            Err(e) => {
                self.log.failure("clear bootloader message", &e);
                false
            }
        };
        self.log.event(RecoveryEvent::ControlBlockCleared { ok });
        ok
    }
}

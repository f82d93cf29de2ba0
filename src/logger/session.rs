//! Session logger: timestamped text log plus the JSONL event stream.
//!
//! A dedicated logger thread owns the temporary text log and the `JsonlWriter`.
//! The control flow sends lines and events over a bounded crossbeam channel with
//! `try_send()`, so a stalled disk never blocks a wipe or install. When the
//! thread cannot be started, the handle degrades to direct unbuffered appends,
//! and finally to stderr.

#![allow(missing_docs)]

use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::core::errors::{RecoveryError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity, open_append};

// ──────────────────── channel capacity ────────────────────

const CHANNEL_CAPACITY: usize = 1024;

/// How long `flush()` waits for the logger thread to acknowledge.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

// ──────────────────── public event type ────────────────────

/// Line severity; rendered as the `I`/`W`/`E` column of the text log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    #[must_use]
    pub const fn tag(self) -> char {
        match self {
            Self::Info => 'I',
            Self::Warn => 'W',
            Self::Error => 'E',
        }
    }
}

/// Structured milestones of a maintenance session.
#[derive(Debug, Clone)]
pub enum RecoveryEvent {
    SessionStarted {
        version: String,
        config_hash: String,
    },
    ArgsResolved {
        source: String,
        args: Vec<String>,
    },
    ControlBlockWritten {
        args: Vec<String>,
        ok: bool,
    },
    ControlBlockCleared {
        ok: bool,
    },
    VolumeWiped {
        volume: String,
        ok: bool,
        duration_ms: u64,
    },
    PartitionWiped {
        partition: String,
        method: String,
        ok: bool,
    },
    InstallAttempted {
        package: String,
        retry_count: u32,
        result: String,
    },
    RetryScheduled {
        package: String,
        attempt: u32,
    },
    SessionFinalized {
        modified_flash: bool,
    },
    Error {
        code: String,
        message: String,
    },
}

enum LogMessage {
    Line { level: Level, elapsed: Duration, text: String },
    Event(RecoveryEvent),
    Flush(Sender<()>),
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// One captured text line (capture backend only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLine {
    pub level: Level,
    pub text: String,
}

#[derive(Default)]
struct Capture {
    lines: Vec<CapturedLine>,
    events: Vec<LogEntry>,
}

enum Backend {
    Channel {
        tx: Sender<LogMessage>,
        dropped: Arc<AtomicU64>,
    },
    Direct(Mutex<File>),
    Capture(Mutex<Capture>),
    Stderr,
}

/// Thread-safe, cheaply-cloneable handle for session logging.
#[derive(Clone)]
pub struct LogHandle {
    backend: Arc<Backend>,
    started: Instant,
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle")
            .field("backend", &self.backend_name())
            .finish_non_exhaustive()
    }
}

impl LogHandle {
    /// Handle that records everything in memory; used by tests.
    #[must_use]
    pub fn capture() -> Self {
        Self::with_backend(Backend::Capture(Mutex::new(Capture::default())))
    }

    /// Handle writing straight to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::with_backend(Backend::Stderr)
    }

    /// Handle appending unbuffered to `path`, or stderr when it cannot be opened.
    #[must_use]
    pub fn direct(path: &std::path::Path) -> Self {
        match open_append(path) {
            Ok((file, _)) => Self::with_backend(Backend::Direct(Mutex::new(file))),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[RCV-LOG] {e}; logging to stderr");
                Self::stderr()
            }
        }
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend: Arc::new(backend),
            started: Instant::now(),
        }
    }

    pub fn info(&self, text: impl Into<String>) {
        self.line(Level::Info, text.into());
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.line(Level::Warn, text.into());
    }

    pub fn error(&self, text: impl Into<String>) {
        self.line(Level::Error, text.into());
    }

    /// Log an error line and a structured error event for `err`.
    pub fn failure(&self, context: &str, err: &RecoveryError) {
        self.error(format!("{context}: {err}"));
        self.event(RecoveryEvent::Error {
            code: err.code().to_string(),
            message: format!("{context}: {err}"),
        });
    }

    pub fn line(&self, level: Level, text: String) {
        let elapsed = self.started.elapsed();
        match &*self.backend {
            Backend::Channel { tx, dropped } => {
                let msg = LogMessage::Line { level, elapsed, text };
                if let Err(TrySendError::Full(_)) = tx.try_send(msg) {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Backend::Direct(file) => {
                let rendered = render_line(level, elapsed, &text);
                if file.lock().write_all(rendered.as_bytes()).is_err() {
                    let _ = io::stderr().write_all(rendered.as_bytes());
                }
            }
            Backend::Capture(capture) => capture.lock().lines.push(CapturedLine { level, text }),
            Backend::Stderr => {
                let _ = io::stderr().write_all(render_line(level, elapsed, &text).as_bytes());
            }
        }
    }

    /// Record a structured event.
    pub fn event(&self, event: RecoveryEvent) {
        match &*self.backend {
            Backend::Channel { tx, dropped } => {
                if let Err(TrySendError::Full(_)) = tx.try_send(LogMessage::Event(event)) {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Backend::Capture(capture) => capture.lock().events.push(event_to_log_entry(&event)),
            Backend::Direct(_) | Backend::Stderr => {
                if let Ok(json) = serde_json::to_string(&event_to_log_entry(&event)) {
                    let _ = writeln!(io::stderr(), "[RCV-JSONL] {json}");
                }
            }
        }
    }

    /// Block until every line sent so far has reached the text log.
    pub fn flush(&self) {
        if let Backend::Channel { tx, .. } = &*self.backend {
            let (ack_tx, ack_rx) = bounded(1);
            if tx.send_timeout(LogMessage::Flush(ack_tx), FLUSH_TIMEOUT).is_ok() {
                let _ = ack_rx.recv_timeout(FLUSH_TIMEOUT);
            }
        }
    }

    /// Ask the logger thread to drain and exit.
    pub fn shutdown(&self) {
        if let Backend::Channel { tx, .. } = &*self.backend {
            let _ = tx.send_timeout(LogMessage::Shutdown, FLUSH_TIMEOUT);
        }
    }

    /// Number of messages dropped due to channel back-pressure.
    pub fn dropped_messages(&self) -> u64 {
        match &*self.backend {
            Backend::Channel { dropped, .. } => dropped.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match &*self.backend {
            Backend::Channel { .. } => "thread",
            Backend::Direct(_) => "direct",
            Backend::Capture(_) => "capture",
            Backend::Stderr => "stderr",
        }
    }

    /// Lines recorded by a capture handle; empty for other backends.
    #[must_use]
    pub fn captured_lines(&self) -> Vec<CapturedLine> {
        match &*self.backend {
            Backend::Capture(capture) => capture.lock().lines.clone(),
            _ => Vec::new(),
        }
    }

    /// Events recorded by a capture handle; empty for other backends.
    #[must_use]
    pub fn captured_events(&self) -> Vec<LogEntry> {
        match &*self.backend {
            Backend::Capture(capture) => capture.lock().events.clone(),
            _ => Vec::new(),
        }
    }

    /// Whether any captured line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.captured_lines().iter().any(|line| line.text.contains(needle))
    }
}

// ──────────────────── configuration ────────────────────

/// Options for the session logger.
#[derive(Debug, Clone)]
pub struct SessionLoggerConfig {
    /// Temporary text log, later copied into the persistent log dir.
    pub text_path: PathBuf,
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl SessionLoggerConfig {
    #[must_use]
    pub fn from_config(config: &crate::core::config::Config) -> Self {
        Self {
            text_path: config.paths.temporary_log.clone(),
            jsonl_config: JsonlConfig {
                path: config.paths.temporary_events.clone(),
                fallback_path: None,
                max_size_bytes: config.logging.events_max_size_bytes,
                max_rotated_files: config.logging.events_max_rotated_files,
            },
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle.
pub fn spawn_session_logger(
    config: SessionLoggerConfig,
) -> Result<(LogHandle, thread::JoinHandle<()>)> {
    let (file, _) = open_append(&config.text_path)?;
    let (tx, rx) = bounded::<LogMessage>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = LogHandle::with_backend(Backend::Channel { tx, dropped });

    let join = thread::Builder::new()
        .name("rcv-logger".to_string())
        .spawn(move || logger_thread_main(&rx, file, config.jsonl_config, &dropped_clone))
        .map_err(|e| RecoveryError::Fatal {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

/// Start session logging, degrading to direct writes and then stderr.
pub fn start_session_logging(
    config: SessionLoggerConfig,
) -> (LogHandle, Option<thread::JoinHandle<()>>) {
    let text_path = config.text_path.clone();
    match spawn_session_logger(config) {
        Ok((handle, join)) => (handle, Some(join)),
        Err(e) => {
            let _ = writeln!(io::stderr(), "[RCV-LOG] {e}; falling back to direct writes");
            (LogHandle::direct(&text_path), None)
        }
    }
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(
    rx: &Receiver<LogMessage>,
    file: File,
    jsonl_config: JsonlConfig,
    dropped: &AtomicU64,
) {
    let mut text = LineWriter::new(file);
    let mut text_ok = true;
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(message) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log messages dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        match message {
            LogMessage::Line { level, elapsed, text: line } => {
                let rendered = render_line(level, elapsed, &line);
                if text_ok && text.write_all(rendered.as_bytes()).is_err() {
                    text_ok = false;
                    let _ = writeln!(io::stderr(), "[RCV-LOG] text log write failed, using stderr");
                }
                if !text_ok {
                    let _ = io::stderr().write_all(rendered.as_bytes());
                }
            }
            LogMessage::Event(event) => jsonl.write_entry(&event_to_log_entry(&event)),
            LogMessage::Flush(ack) => {
                let _ = text.flush();
                jsonl.flush();
                let _ = ack.send(());
            }
            LogMessage::Shutdown => break,
        }
    }

    let _ = text.flush();
    let _ = text.get_ref().sync_data();
    jsonl.fsync();
}

/// `[   12.345678] I:message`
fn render_line(level: Level, elapsed: Duration, text: &str) -> String {
    let mut rendered = format!("[{:12.6}] {}:{text}", elapsed.as_secs_f64(), level.tag());
    if !rendered.ends_with('\n') {
        rendered.push('\n');
    }
    rendered
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &RecoveryEvent) -> LogEntry {
    match event {
        RecoveryEvent::SessionStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::SessionStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        RecoveryEvent::ArgsResolved { source, args } => {
            let mut e = LogEntry::new(EventType::ArgsResolved, Severity::Info);
            e.source = Some(source.clone());
            e.args = Some(args.clone());
            e
        }
        RecoveryEvent::ControlBlockWritten { args, ok } => {
            let severity = if *ok { Severity::Info } else { Severity::Critical };
            let mut e = LogEntry::new(EventType::ControlBlockWrite, severity);
            e.args = Some(args.clone());
            e.ok = Some(*ok);
            e
        }
        RecoveryEvent::ControlBlockCleared { ok } => {
            let severity = if *ok { Severity::Info } else { Severity::Critical };
            let mut e = LogEntry::new(EventType::ControlBlockClear, severity);
            e.ok = Some(*ok);
            e
        }
        RecoveryEvent::VolumeWiped {
            volume,
            ok,
            duration_ms,
        } => {
            let severity = if *ok { Severity::Info } else { Severity::Warning };
            let mut e = LogEntry::new(EventType::VolumeWipe, severity);
            e.path = Some(volume.clone());
            e.ok = Some(*ok);
            e.duration_ms = Some(*duration_ms);
            e
        }
        RecoveryEvent::PartitionWiped {
            partition,
            method,
            ok,
        } => {
            let severity = if *ok { Severity::Info } else { Severity::Warning };
            let mut e = LogEntry::new(EventType::PartitionWipe, severity);
            e.path = Some(partition.clone());
            e.source = Some(method.clone());
            e.ok = Some(*ok);
            e
        }
        RecoveryEvent::InstallAttempted {
            package,
            retry_count,
            result,
        } => {
            let mut e = LogEntry::new(EventType::InstallAttempt, Severity::Info);
            e.path = Some(package.clone());
            e.attempt = Some(*retry_count);
            e.result = Some(result.clone());
            e
        }
        RecoveryEvent::RetryScheduled { package, attempt } => {
            let mut e = LogEntry::new(EventType::RetryScheduled, Severity::Warning);
            e.path = Some(package.clone());
            e.attempt = Some(*attempt);
            e
        }
        RecoveryEvent::SessionFinalized { modified_flash } => {
            let mut e = LogEntry::new(EventType::SessionFinalize, Severity::Info);
            e.details = Some(format!("modified_flash={modified_flash}"));
            e.ok = Some(true);
            e
        }
        RecoveryEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
    }
}

// ──────────────────── tests ────────────────────

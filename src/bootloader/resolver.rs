//! Argument resolution: invocation > control block > command queue.

#![allow(missing_docs)]

use crate::bootloader::command_queue::CommandQueue;
use crate::bootloader::control_block::{ControlBlockStore, PendingArgs};
use crate::logger::session::{LogHandle, RecoveryEvent};

/// Where the session's arguments came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSource {
    Invocation,
    ControlBlock,
    CommandQueue,
    /// Nothing pending anywhere.
    Empty,
}

impl ArgSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invocation => "invocation",
            Self::ControlBlock => "control_block",
            Self::CommandQueue => "command_queue",
            Self::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArgs {
    pub program: String,
    /// Arguments without the program name.
    pub args: Vec<String>,
    /// `stage` field of the control block at startup.
    pub stage: String,
    pub source: ArgSource,
}

pub struct ArgumentResolver<'a> {
    store: &'a ControlBlockStore,
    /// `None` when the device has no cache volume.
    queue: Option<&'a CommandQueue>,
    log: &'a LogHandle,
}

impl<'a> ArgumentResolver<'a> {
    #[must_use]
    pub fn new(
        store: &'a ControlBlockStore,
        queue: Option<&'a CommandQueue>,
        log: &'a LogHandle,
    ) -> Self {
        Self { store, queue, log }
    }

    /// Merge the sources and persist the result as the pending command.
    ///
    /// `argv[0]` is the program name. The resolved arguments are written back
    /// to the control block even when they came from it, so an interrupted
    /// session resumes the same work on the next boot.
    pub fn resolve(&self, argv: &[String]) -> ResolvedArgs {
        let program = argv
            .first()
            .cloned()
            .unwrap_or_else(|| "recovery".to_string());
        let mut args: Vec<String> = argv.iter().skip(1).cloned().collect();
        let mut source = if args.is_empty() {
            ArgSource::Empty
        } else {
            ArgSource::Invocation
        };

        let record = self.store.read();
        if !record.boot_mode.is_empty() {
            self.log.info(format!("Boot command: {}", record.boot_mode));
        }
        if !record.status.is_empty() {
            self.log.info(format!("Boot status: {}", record.status));
        }

        if args.is_empty() {
            match record.pending_args() {
                PendingArgs::Args(pending) => {
                    self.log.info(format!(
                        "Got {} arguments from boot message",
                        pending.len() + 1
                    ));
                    if !pending.is_empty() {
                        source = ArgSource::ControlBlock;
                    }
                    args = pending;
                }
                PendingArgs::Malformed(raw) => {
                    self.log.error(format!("Bad boot message: {raw:?}"));
                }
                PendingArgs::Empty => {}
            }
        }

        if args.is_empty()
            && let Some(queue) = self.queue
        {
            match queue.read_tokens() {
                Ok(tokens) => {
                    if !tokens.is_empty() {
                        self.log.info(format!(
                            "Got {} arguments from {}",
                            tokens.len() + 1,
                            queue.path().display()
                        ));
                        source = ArgSource::CommandQueue;
                    }
                    args = tokens;
                }
                Err(e) => self.log.failure("read command file", &e),
            }
        }

        self.store.write_pending(&args);
        self.log.event(RecoveryEvent::ArgsResolved {
            source: source.as_str().to_string(),
            args: args.clone(),
        });

        ResolvedArgs {
            program,
            args,
            stage: record.stage,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootloader::control_block::{ControlBlockRecord, InMemoryControlBlock};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| (*s).to_string()).collect()
    }

    fn queue_with(dir: &std::path::Path, content: &str) -> CommandQueue {
        let path = dir.join("command");
        std::fs::write(&path, content).unwrap();
        CommandQueue::new(path)
    }

    #[test]
    fn invocation_args_win_and_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(InMemoryControlBlock::with_record(ControlBlockRecord::pending(
            &strings(&["--wipe_data"]),
            "",
            "",
        )));
        let log = LogHandle::capture();
        let store = ControlBlockStore::new(device.clone(), log.clone());
        let queue = queue_with(dir.path(), "--wipe_cache\n");

        let resolved = ArgumentResolver::new(&store, Some(&queue), &log)
            .resolve(&strings(&["recovery", "--show_text"]));

        assert_eq!(resolved.source, ArgSource::Invocation);
        assert_eq!(resolved.args, strings(&["--show_text"]));
        assert_eq!(queue.read_attempts(), 0);
        assert_eq!(
            device.snapshot().pending_args(),
            PendingArgs::Args(strings(&["--show_text"]))
        );
    }

    #[test]
    fn control_block_used_without_reading_queue() {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(InMemoryControlBlock::with_record(ControlBlockRecord::pending(
            &strings(&["--update_package=/cache/a.zip", "--retry_count=2"]),
            "",
            "1/2",
        )));
        let log = LogHandle::capture();
        let store = ControlBlockStore::new(device, log.clone());
        let queue = queue_with(dir.path(), "--wipe_data\n");

        let resolved =
            ArgumentResolver::new(&store, Some(&queue), &log).resolve(&strings(&["recovery"]));

        assert_eq!(resolved.source, ArgSource::ControlBlock);
        assert_eq!(
            resolved.args,
            strings(&["--update_package=/cache/a.zip", "--retry_count=2"])
        );
        assert_eq!(resolved.stage, "1/2");
        assert_eq!(queue.read_attempts(), 0);
    }

    #[test]
    fn malformed_block_falls_through_to_queue() {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(InMemoryControlBlock::with_record(ControlBlockRecord {
            command: "garbage\n--wipe_data".to_string(),
            ..ControlBlockRecord::default()
        }));
        let log = LogHandle::capture();
        let store = ControlBlockStore::new(device.clone(), log.clone());
        let queue = queue_with(dir.path(), "--wipe_cache\n\n");

        let resolved =
            ArgumentResolver::new(&store, Some(&queue), &log).resolve(&strings(&["recovery"]));

        assert!(log.contains("Bad boot message"));
        assert_eq!(resolved.source, ArgSource::CommandQueue);
        assert_eq!(resolved.args, strings(&["--wipe_cache"]));
        assert_eq!(
            device.snapshot().pending_args(),
            PendingArgs::Args(strings(&["--wipe_cache"]))
        );
    }

    #[test]
    fn no_cache_means_queue_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(InMemoryControlBlock::new());
        let log = LogHandle::capture();
        let store = ControlBlockStore::new(device, log.clone());
        let queue = queue_with(dir.path(), "--wipe_cache\n");

        let resolved = ArgumentResolver::new(&store, None, &log).resolve(&strings(&["recovery"]));

        assert_eq!(resolved.source, ArgSource::Empty);
        assert!(resolved.args.is_empty());
        assert_eq!(queue.read_attempts(), 0);
    }

    #[test]
    fn unreadable_block_resolves_as_zeroed() {
        let device = Arc::new(InMemoryControlBlock::new());
        device.set_fail_reads(true);
        let log = LogHandle::capture();
        let store = ControlBlockStore::new(device.clone(), log.clone());

        let resolved = ArgumentResolver::new(&store, None, &log).resolve(&strings(&["recovery"]));
        assert!(resolved.args.is_empty());
        assert_eq!(device.writes(), 1);
    }

    proptest! {
        #[test]
        fn explicit_args_always_take_precedence(
            explicit in proptest::collection::vec("--[a-z]{1,8}", 1..4),
            pending in proptest::collection::vec("--[a-z]{1,8}", 0..4),
        ) {
            let device = Arc::new(InMemoryControlBlock::with_record(
                ControlBlockRecord::pending(&pending, "", ""),
            ));
            let log = LogHandle::capture();
            let store = ControlBlockStore::new(device.clone(), log.clone());
            let mut argv = vec!["recovery".to_string()];
            argv.extend(explicit.iter().cloned());

            let resolved = ArgumentResolver::new(&store, None, &log).resolve(&argv);
            prop_assert_eq!(&resolved.args, &explicit);
            prop_assert_eq!(device.snapshot().pending_args(), PendingArgs::Args(explicit));
        }
    }
}

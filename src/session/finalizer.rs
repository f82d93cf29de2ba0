//! End-of-session cleanup. Safe to run any number of times.

#![allow(missing_docs)]

use std::fs;

use crate::core::errors::RecoveryError;
use crate::logger::session::RecoveryEvent;
use crate::session::context::SessionContext;

pub struct SessionFinalizer<'a> {
    ctx: &'a mut SessionContext,
}

impl<'a> SessionFinalizer<'a> {
    pub fn new(ctx: &'a mut SessionContext) -> Self {
        Self { ctx }
    }

    /// Save the locale, persist logs, clear the control block, drop the
    /// command queue, unmount cache, and sync.
    ///
    /// Every step is best effort; a failure is logged and the rest still run.
    pub fn finalize(&mut self) {
        self.save_locale();
        self.ctx.copy_logs();

        self.ctx.store.clear();

        if self.ctx.has_cache {
            if let Err(e) = self.ctx.queue.remove() {
                self.ctx.log.warn(format!(
                    "Can't unlink {}: {e}",
                    self.ctx.queue.path().display()
                ));
            }
            let cache_root = self.ctx.config.paths.cache_root.clone();
            if let Err(e) = self.ctx.volumes.ensure_unmounted(&cache_root) {
                self.ctx.log.failure("unmount cache", &e);
            }
        }

        self.ctx.log.event(RecoveryEvent::SessionFinalized {
            modified_flash: self.ctx.modified_flash,
        });
        nix::unistd::sync();
    }

    fn save_locale(&mut self) {
        if self.ctx.locale.is_empty() || !self.ctx.has_cache {
            return;
        }
        let path = self.ctx.config.paths.last_locale();
        self.ctx
            .log
            .info(format!("Saving locale \"{}\"", self.ctx.locale));
        if let Err(e) = self.ctx.volumes.ensure_mounted(&path) {
            self.ctx.log.failure("mount locale file", &e);
            return;
        }
        let written = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&path, &self.ctx.locale));
        if let Err(e) = written {
            self.ctx
                .log
                .failure("save locale", &RecoveryError::io(&path, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootloader::control_block::{ControlBlockRecord, PendingArgs};
    use crate::bootloader::control_block::ControlBlockDevice;
    use crate::session::testbed::Testbed;

    #[test]
    fn clears_block_queue_and_saves_locale() {
        let (_dir, fx) = Testbed::temp();
        fx.control_block
            .store(&ControlBlockRecord::pending(&["--wipe_cache".to_string()], "", ""))
            .unwrap();
        fs::create_dir_all(&fx.config.paths.log_dir).unwrap();
        fs::write(fx.config.paths.command_file(), "--wipe_cache\n").unwrap();

        let mut ctx = fx.context();
        ctx.locale = "fr-FR".to_string();
        SessionFinalizer::new(&mut ctx).finalize();

        assert!(fx.control_block.snapshot().is_clear());
        assert!(!fx.config.paths.command_file().exists());
        assert_eq!(
            fs::read_to_string(fx.config.paths.last_locale()).unwrap(),
            "fr-FR"
        );
        assert!(!fx.volumes.is_mounted(&fx.config.paths.cache_root));
    }

    #[test]
    fn logs_copied_only_after_flash_modified() {
        let (_dir, fx) = Testbed::temp();
        fs::write(&fx.config.paths.temporary_log, "session line\n").unwrap();

        let mut ctx = fx.context();
        SessionFinalizer::new(&mut ctx).finalize();
        assert!(!fx.config.paths.last_log().exists());

        ctx.modified_flash = true;
        SessionFinalizer::new(&mut ctx).finalize();
        assert_eq!(
            fs::read_to_string(fx.config.paths.last_log()).unwrap(),
            "session line\n"
        );
    }

    #[test]
    fn idempotent() {
        let (_dir, fx) = Testbed::temp();
        let mut ctx = fx.context();
        ctx.modified_flash = true;
        fs::write(&fx.config.paths.temporary_log, "one\n").unwrap();

        SessionFinalizer::new(&mut ctx).finalize();
        SessionFinalizer::new(&mut ctx).finalize();

        assert_eq!(fx.control_block.snapshot().pending_args(), PendingArgs::Empty);
        // Appended once: the second copy starts at the saved cursor.
        assert_eq!(
            fs::read_to_string(fx.config.paths.log_file()).unwrap(),
            "one\n"
        );
        let finalized = ctx
            .log
            .captured_events()
            .iter()
            .filter(|e| e.event == crate::logger::jsonl::EventType::SessionFinalize)
            .count();
        assert_eq!(finalized, 2);
    }

    #[test]
    fn no_cache_skips_queue_and_locale() {
        let (_dir, fx) = Testbed::temp_without_cache();
        let mut ctx = fx.context();
        ctx.locale = "en-US".to_string();
        SessionFinalizer::new(&mut ctx).finalize();
        assert!(!fx.config.paths.last_locale().exists());
        assert!(fx.control_block.snapshot().is_clear());
    }
}

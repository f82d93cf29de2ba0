//! One maintenance session from argument resolution to the power request.

#![allow(missing_docs)]

use std::fs;
use std::time::Duration;

use crate::bootloader::resolver::ArgumentResolver;
use crate::install::external::InstallReport;
use crate::install::orchestrator::{InstallOrchestrator, UpdateOutcome};
use crate::install::outcome::InstallResult;
use crate::logger::session::RecoveryEvent;
use crate::session::args::{SessionArgs, parse_stage};
use crate::session::context::SessionContext;
use crate::session::finalizer::SessionFinalizer;
use crate::session::interactive::MenuSession;
use crate::session::terminal::{TerminalAction, resume_command};
use crate::ui::screen::Background;
use crate::wipe::erase::WipeOrchestrator;

/// Set by the bootloader when the screen must stay dark.
pub const QUIESCENT_PROPERTY: &str = "ro.boot.quiescent";

/// How the session ended. Both variants mean a power request was issued
/// (or attempted); the caller only has to park.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Retry reboot; finalization was skipped so the pending command survives.
    Resume,
    Terminal(TerminalAction),
}

enum Dispatched {
    Status(InstallResult),
    Resume,
}

pub struct SessionRunner<'a> {
    ctx: &'a mut SessionContext,
}

impl<'a> SessionRunner<'a> {
    pub fn new(ctx: &'a mut SessionContext) -> Self {
        Self { ctx }
    }

    /// Run the session for process arguments `argv` (`argv[0]` is the program).
    pub fn run(&mut self, argv: &[String]) -> SessionEnd {
        self.announce();

        let resolved = {
            let queue = self.ctx.has_cache.then_some(&self.ctx.queue);
            ArgumentResolver::new(&self.ctx.store, queue, &self.ctx.log).resolve(argv)
        };
        self.ctx.stage = resolved.stage.clone();
        let args = SessionArgs::from_tokens(&resolved.args, &self.ctx.log);

        self.ctx.locale = self.resolve_locale(&args);
        self.ctx.reason.clone_from(&args.reason);
        self.ctx
            .log
            .info(format!("locale is [{}]", self.ctx.locale));
        self.ctx.log.info(format!("stage is [{}]", self.ctx.stage));
        self.ctx.log.info(format!(
            "reason is [{}]",
            self.ctx.reason.as_deref().unwrap_or("")
        ));

        self.start_ui(&args);
        self.ctx
            .log
            .info(format!("Command: {}", resolved.args.join(" ")));

        let quiescent = self.ctx.props.get_bool(QUIESCENT_PROPERTY, false);
        let status = match self.dispatch(&args, &resolved.args, quiescent) {
            Dispatched::Status(status) => status,
            Dispatched::Resume => return SessionEnd::Resume,
        };

        if matches!(status, InstallResult::Error | InstallResult::Corrupt) {
            self.ctx.ui.set_background(Background::Error);
            if !self.ctx.ui.is_text_visible() {
                let pause = Duration::from_secs(self.ctx.config.ui.error_screen_secs);
                self.ctx.services.clock.sleep(pause);
            }
        }

        let mut after = if args.shutdown_after {
            TerminalAction::Shutdown
        } else {
            TerminalAction::Reboot
        };
        if (status == InstallResult::None && !args.sideload_auto_reboot)
            || self.ctx.ui.is_text_visible()
        {
            let chosen = MenuSession::new(&mut *self.ctx).prompt_and_wait(status);
            if let Some(action) = TerminalAction::from_builtin(chosen) {
                after = action;
            }
        }

        SessionFinalizer::new(&mut *self.ctx).finalize();
        self.ctx.volumes.unmount_all();
        nix::unistd::sync();

        self.ctx.print(after.message());
        self.request_power(&after.powerctl_command(quiescent));
        SessionEnd::Terminal(after)
    }

    fn announce(&self) {
        let config_hash = self
            .ctx
            .config
            .stable_hash()
            .unwrap_or_else(|_| "unknown".to_string());
        self.ctx.log.info(format!(
            "Starting recovery (pid {}) on {}",
            std::process::id(),
            chrono::Local::now().format("%a %b %e %H:%M:%S %Y")
        ));
        self.ctx.log.event(RecoveryEvent::SessionStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
        });
    }

    /// `--locale`, else the locale saved by the previous session, else the default.
    fn resolve_locale(&self, args: &SessionArgs) -> String {
        if let Some(locale) = &args.locale {
            return locale.clone();
        }
        if self.ctx.has_cache {
            let path = self.ctx.config.paths.last_locale();
            if self.ctx.volumes.ensure_mounted(&path).is_ok()
                && let Ok(saved) = fs::read_to_string(&path)
            {
                let saved = saved.trim();
                if !saved.is_empty() {
                    return saved.to_string();
                }
            }
        }
        self.ctx.config.ui.default_locale.clone()
    }

    fn start_ui(&mut self, args: &SessionArgs) {
        let ui = &mut self.ctx.ui;
        ui.set_locale(&self.ctx.locale);
        if let Some((current, max)) = parse_stage(&self.ctx.stage) {
            ui.set_stage(current, max);
        }
        ui.set_background(Background::None);
        if args.show_text {
            ui.show_text(true);
        }
        ui.set_security_update(args.security_update);
        self.ctx.device.start_recovery();
    }

    /// Carry out the requested operation, first match wins.
    fn dispatch(&mut self, args: &SessionArgs, raw: &[String], quiescent: bool) -> Dispatched {
        if !args.has_command() {
            return Dispatched::Status(self.idle(args.just_exit));
        }
        let status = if let Some(package) = &args.update_package {
            let outcome = InstallOrchestrator::new(&mut *self.ctx).install_update_package(
                package,
                args.retry_count,
                raw,
            );
            match outcome {
                UpdateOutcome::Finished(status) => status,
                UpdateOutcome::RebootAndResume { .. } => {
                    if self.request_power(&resume_command(quiescent)) {
                        return Dispatched::Resume;
                    }
                    self.ctx.print("Reboot failed");
                    if self.ctx.is_debuggable() {
                        self.ctx.ui.show_text(true);
                    }
                    InstallResult::Retry
                }
            }
        } else if args.wipe_data {
            ok_or_error(WipeOrchestrator::new(&mut *self.ctx).wipe_data())
        } else if args.prompt_and_wipe_data {
            self.ctx.ui.show_text(true);
            self.ctx.ui.set_background(Background::Error);
            let ok = MenuSession::new(&mut *self.ctx).prompt_and_wipe_data();
            self.ctx.ui.show_text(false);
            ok_or_error(ok)
        } else if args.wipe_cache {
            ok_or_error(WipeOrchestrator::new(&mut *self.ctx).wipe_cache(false))
        } else if args.wipe_ab {
            ok_or_error(WipeOrchestrator::new(&mut *self.ctx).wipe_ab_device(args.wipe_package_size))
        } else {
            self.sideload(args.sideload_auto_reboot)
        };
        Dispatched::Status(status)
    }

    fn idle(&mut self, just_exit: bool) -> InstallResult {
        if just_exit {
            return InstallResult::Success;
        }
        if self.ctx.is_debuggable() {
            self.ctx.ui.show_text(true);
        }
        self.ctx.ui.set_background(Background::NoCommand);
        InstallResult::None
    }

    fn sideload(&mut self, auto_reboot: bool) -> InstallResult {
        if !auto_reboot {
            self.ctx.ui.show_text(true);
        }
        self.ctx.modified_flash = true;
        let transport = self.ctx.services.sideload.clone();
        if let Err(e) = transport.start() {
            self.ctx.failure("start sideload", &e);
            return InstallResult::Error;
        }
        let report = match transport.wait_for_package(false) {
            Some(package) => InstallOrchestrator::new(&mut *self.ctx).run_installer(&package, 0, true),
            None => {
                self.ctx.log.error("sideload ended without a package");
                InstallReport::new(InstallResult::Error)
            }
        };
        transport.stop();

        let mut status = report.result;
        if status == InstallResult::Success
            && report.wipe_cache
            && !WipeOrchestrator::new(&mut *self.ctx).wipe_cache(false)
        {
            status = InstallResult::Error;
        }
        self.ctx.print(&format!(
            "\nInstall from ADB complete (status: {}).",
            status.code()
        ));
        if auto_reboot {
            self.ctx.print("Rebooting automatically.");
        }
        status
    }

    fn request_power(&mut self, command: &str) -> bool {
        match self.ctx.services.power.request(command) {
            Ok(()) => true,
            Err(e) => {
                self.ctx.failure("power request", &e);
                false
            }
        }
    }
}

fn ok_or_error(ok: bool) -> InstallResult {
    if ok {
        InstallResult::Success
    } else {
        InstallResult::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootloader::control_block::{ControlBlockDevice, ControlBlockRecord, PendingArgs};
    use crate::install::external::ScriptedInstaller;
    use crate::platform::pal::StaticProperties;
    use crate::session::testbed::{TESTBED_PRODUCT, Testbed};
    use std::sync::Arc;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("recovery")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn no_command_times_out_to_reboot() {
        let (_dir, tb) = Testbed::temp();
        let mut ctx = tb.context();
        let end = SessionRunner::new(&mut ctx).run(&argv(&[]));

        assert_eq!(end, SessionEnd::Terminal(TerminalAction::Reboot));
        assert_eq!(tb.power.requests(), vec!["reboot,".to_string()]);
        assert!(tb.control_block.snapshot().is_clear());
        assert!(tb.log.contains("Rebooting..."));
        assert!(!ctx.modified_flash);
    }

    #[test]
    fn wipe_cache_from_control_block() {
        let (_dir, tb) = Testbed::temp();
        tb.control_block
            .store(&ControlBlockRecord::pending(&["--wipe_cache".to_string()], "", ""))
            .unwrap();
        fs::write(&tb.config.paths.temporary_log, "[    0.000000] I:boot\n").unwrap();
        let mut ctx = tb.context();

        let end = SessionRunner::new(&mut ctx).run(&argv(&[]));
        assert_eq!(end, SessionEnd::Terminal(TerminalAction::Reboot));
        let format_cache = format!("format {}", tb.config.paths.cache_root.display());
        assert!(tb.volumes.history().contains(&format_cache));
        assert!(tb.control_block.snapshot().is_clear());
        assert!(tb.config.paths.log_file().is_file());
    }

    #[test]
    fn shutdown_after_selects_power_off() {
        let (_dir, tb) = Testbed::temp();
        let mut ctx = tb.context();
        let end = SessionRunner::new(&mut ctx).run(&argv(&["--wipe_cache", "--shutdown_after"]));
        assert_eq!(end, SessionEnd::Terminal(TerminalAction::Shutdown));
        assert_eq!(tb.power.requests(), vec!["shutdown,".to_string()]);
    }

    #[test]
    fn retryable_install_reboots_without_finalizing() {
        let (_dir, mut tb) = Testbed::temp();
        tb.installer = Arc::new(ScriptedInstaller::new([InstallReport::new(
            InstallResult::Retry,
        )]));
        let mut ctx = tb.context();

        let end = SessionRunner::new(&mut ctx).run(&argv(&["--update_package=/cache/ota.zip"]));
        assert_eq!(end, SessionEnd::Resume);
        assert_eq!(tb.power.requests(), vec!["reboot,recovery".to_string()]);
        assert_eq!(
            tb.control_block.snapshot().pending_args(),
            PendingArgs::Args(vec![
                "--update_package=/cache/ota.zip".to_string(),
                "--retry_count=1".to_string(),
            ])
        );
        assert!(tb.log.contains("Retry attempt 1"));
    }

    #[test]
    fn quiescent_boot_suffixes_plain_reboot() {
        let (_dir, mut tb) = Testbed::temp();
        tb.props = Arc::new(
            StaticProperties::new()
                .with("ro.build.product", TESTBED_PRODUCT)
                .with(QUIESCENT_PROPERTY, "1"),
        );
        let mut ctx = tb.context();
        SessionRunner::new(&mut ctx).run(&argv(&["--just_exit"]));
        assert_eq!(tb.power.requests(), vec!["reboot,,quiescent".to_string()]);
    }

    #[test]
    fn failed_wipe_pauses_on_error_screen() {
        let (_dir, tb) = Testbed::temp();
        let mut ctx = tb.context();
        // A zero-sized wipe package is always rejected.
        let end = SessionRunner::new(&mut ctx).run(&argv(&["--wipe_ab"]));
        assert_eq!(end, SessionEnd::Terminal(TerminalAction::Reboot));
        assert_eq!(tb.clock.sleeps(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn sideload_auto_reboot_installs_spooled_package() {
        let (_dir, tb) = Testbed::temp();
        let package = tb.root.join("tmp/sideload/package.zip");
        fs::create_dir_all(package.parent().unwrap()).unwrap();
        fs::write(&package, b"PK").unwrap();
        let mut ctx = tb.context();
        let end = SessionRunner::new(&mut ctx).run(&argv(&["--sideload_auto_reboot"]));

        assert_eq!(end, SessionEnd::Terminal(TerminalAction::Reboot));
        // The scripted installer reports Error once its script is empty.
        assert!(tb.log.contains("Install from ADB complete (status: 1)."));
        assert!(tb.log.contains("Rebooting automatically."));
        assert_eq!(tb.installer.requests()[0].package, package);
        assert!(!package.exists());
    }

    #[test]
    fn locale_saved_by_previous_session_is_reused() {
        let (_dir, tb) = Testbed::temp();
        fs::create_dir_all(&tb.config.paths.log_dir).unwrap();
        fs::write(tb.config.paths.last_locale(), "fr-FR\n").unwrap();
        let mut ctx = tb.context();
        SessionRunner::new(&mut ctx).run(&argv(&["--just_exit"]));
        assert_eq!(ctx.locale, "fr-FR");
        assert!(tb.log.contains("locale is [fr-FR]"));

        let mut ctx = tb.context();
        SessionRunner::new(&mut ctx).run(&argv(&["--just_exit", "--locale=de-DE"]));
        assert_eq!(ctx.locale, "de-DE");
        assert_eq!(
            fs::read_to_string(tb.config.paths.last_locale()).unwrap(),
            "de-DE"
        );
    }

    #[test]
    fn refused_power_request_still_ends_session() {
        let (_dir, tb) = Testbed::temp();
        tb.power.set_fail(true);
        let mut ctx = tb.context();
        let end = SessionRunner::new(&mut ctx).run(&argv(&["--just_exit"]));
        assert_eq!(end, SessionEnd::Terminal(TerminalAction::Reboot));
        assert!(tb.power.requests().is_empty());
        assert!(tb.log.contains("refused"));
    }
}

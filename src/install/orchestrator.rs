//! Install flow: preconditions, installer call, override, retry policy.

#![allow(missing_docs)]

use std::path::Path;

use crate::install::battery::{BatteryGate, BatteryThresholds};
use crate::install::external::{InstallReport, InstallRequest};
use crate::install::failure::{FailureCode, write_failure_record};
use crate::install::outcome::InstallResult;
use crate::logger::session::RecoveryEvent;
use crate::session::context::SessionContext;
use crate::session::retry::{RetryDecision, RetryLedger};
use crate::ui::prompts::yes_no;
use crate::ui::screen::Progress;
use crate::wipe::erase::WipeOrchestrator;

/// How a command-line install ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Finished(InstallResult),
    /// The retry counter was bumped; reboot into this mode and stop here.
    RebootAndResume { attempt: u32 },
}

pub struct InstallOrchestrator<'a> {
    ctx: &'a mut SessionContext,
}

impl<'a> InstallOrchestrator<'a> {
    pub fn new(ctx: &'a mut SessionContext) -> Self {
        Self { ctx }
    }

    /// First failing precondition, if any.
    pub fn failed_precondition(&mut self) -> Option<FailureCode> {
        let thresholds = BatteryThresholds::from_config(&self.ctx.config.install);
        let battery_ok = BatteryGate::new(
            self.ctx.services.battery.as_ref(),
            self.ctx.services.clock.as_ref(),
            thresholds,
            &self.ctx.log,
        )
        .check();
        if !battery_ok {
            return Some(FailureCode::LowBattery);
        }
        if self.bootreason_blacklisted() {
            return Some(FailureCode::BootreasonInBlacklist);
        }
        None
    }

    #[must_use]
    pub fn bootreason_blacklisted(&self) -> bool {
        let reason = self.ctx.props.get_or("ro.boot.bootreason", "");
        !reason.is_empty()
            && self
                .ctx
                .config
                .install
                .bootreason_blacklist
                .iter()
                .any(|blocked| blocked.eq_ignore_ascii_case(&reason))
    }

    /// One installer call, recorded as an install event.
    pub fn run_installer(&mut self, package: &Path, retry_count: u32, verify: bool) -> InstallReport {
        let request = InstallRequest {
            package: package.to_path_buf(),
            retry_count,
            verify,
            install_log: self.ctx.config.paths.temporary_install.clone(),
        };
        let report = self.ctx.services.installer.install(&request);
        self.ctx.log.event(RecoveryEvent::InstallAttempted {
            package: package.display().to_string(),
            retry_count,
            result: report.result.as_str().to_string(),
        });
        report
    }

    /// Install `--update_package` from the command line.
    ///
    /// `args` are the resolved session arguments; they are re-persisted with a
    /// new retry count before anything destructive happens.
    pub fn install_update_package(
        &mut self,
        package: &Path,
        retry_count: u32,
        args: &[String],
    ) -> UpdateOutcome {
        self.ctx.modified_flash = true;

        if let Some(code) = self.failed_precondition() {
            match code {
                FailureCode::LowBattery => {
                    let needed = self.ctx.config.install.battery_ok_pct;
                    self.ctx.print(&format!(
                        "battery capacity is not enough for installing package, needed is {needed}%"
                    ));
                }
                FailureCode::BootreasonInBlacklist => {
                    self.ctx
                        .print("bootreason is in the blacklist; skip OTA installation");
                }
            }
            let dest = self.ctx.config.paths.temporary_install.clone();
            write_failure_record(&dest, package, code, &self.ctx.log);
            return UpdateOutcome::Finished(InstallResult::Skipped);
        }

        let limit = self.ctx.config.install.retry_limit;
        let ledger = RetryLedger::new(&self.ctx.store, args, limit, &self.ctx.log);
        ledger.mark_started(retry_count);

        let report = self.run_installer(package, retry_count, true);
        if report.result == InstallResult::Success && report.wipe_cache {
            WipeOrchestrator::new(&mut *self.ctx).wipe_cache(false);
        }
        if report.result == InstallResult::Success {
            return UpdateOutcome::Finished(InstallResult::Success);
        }

        self.ctx.print("Installation aborted.");
        if report.result == InstallResult::Retry {
            let ledger = RetryLedger::new(&self.ctx.store, args, limit, &self.ctx.log);
            if let RetryDecision::RebootAndResume { attempt } =
                ledger.on_retry_failure(package, retry_count)
            {
                self.ctx.copy_logs();
                self.ctx.print(&format!("Retry attempt {attempt}"));
                return UpdateOutcome::RebootAndResume { attempt };
            }
        }
        if self.ctx.is_debuggable() {
            self.ctx.ui.show_text(true);
        }
        UpdateOutcome::Finished(report.result)
    }

    /// Install picked interactively; a signature failure may be overridden.
    ///
    /// Returns the result and whether the package asked for a cache wipe.
    pub fn install_interactive(&mut self, package: &Path) -> InstallReport {
        let mut report = self.run_installer(package, 0, true);
        if report.result == InstallResult::Unverified && self.ask_to_continue_unverified() {
            report = self.run_installer(package, 0, false);
        }
        report
    }

    fn ask_to_continue_unverified(&mut self) -> bool {
        if !self.ctx.config.install.allow_unverified_override {
            return false;
        }
        self.ctx.ui.set_progress(Progress::Empty);
        yes_no(
            &mut *self.ctx.ui,
            &mut *self.ctx.device,
            "Signature verification failed",
            "Install anyway?",
        )
    }
}

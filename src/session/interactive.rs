//! Menu-driven flows: the main menu loop and everything reachable from it.

#![allow(missing_docs)]

use std::path::PathBuf;

use crate::install::external::InstallReport;
use crate::install::orchestrator::InstallOrchestrator;
use crate::install::outcome::InstallResult;
use crate::platform::pal::Volume;
use crate::session::context::SessionContext;
use crate::session::finalizer::SessionFinalizer;
use crate::ui::device::BuiltinAction;
use crate::ui::dispatcher::{MenuChoice, get_menu_selection};
use crate::ui::menu::MenuModel;
use crate::ui::prompts::{BrowseOutcome, browse_directory, choose_log_file};
use crate::ui::screen::{Background, Progress};
use crate::wipe::erase::WipeOrchestrator;

/// Label of the emulated storage volume backed by user data.
const EMULATED_LABEL: &str = "emulated";

const DATA_CORRUPT_HEADER: &str = "Can't load Android system. Your data may be corrupt. \
If you continue to get this message, you may need to perform a factory data reset and \
erase all user data stored on this device.";

pub struct MenuSession<'a> {
    ctx: &'a mut SessionContext,
}

impl<'a> MenuSession<'a> {
    pub fn new(ctx: &'a mut SessionContext) -> Self {
        Self { ctx }
    }

    /// Run the main menu until a terminal action is picked.
    ///
    /// `NoAction` means "take the default", which the caller decides.
    pub fn prompt_and_wait(&mut self, mut status: InstallResult) -> BuiltinAction {
        loop {
            SessionFinalizer::new(&mut *self.ctx).finalize();
            match status {
                InstallResult::Success | InstallResult::None => {
                    self.ctx.ui.set_background(Background::NoCommand);
                }
                InstallResult::Error | InstallResult::Corrupt => {
                    self.ctx.ui.set_background(Background::Error);
                }
                _ => {}
            }
            self.ctx.ui.set_progress(Progress::Empty);

            let menu = MenuModel::new(Vec::<String>::new(), self.ctx.device.menu_items()).main();
            let action = match get_menu_selection(&mut *self.ctx.ui, &mut *self.ctx.device, &menu, 0)
            {
                MenuChoice::Back | MenuChoice::Home => {
                    self.ctx.device.go_home();
                    continue;
                }
                MenuChoice::Refresh => continue,
                MenuChoice::TimedOut => BuiltinAction::Reboot,
                MenuChoice::Item(index) => self.ctx.device.invoke_menu_item(index),
            };
            self.ctx.log.info(format!("menu action {action:?}"));

            match action {
                BuiltinAction::NoAction => {}
                BuiltinAction::Reboot
                | BuiltinAction::Shutdown
                | BuiltinAction::RebootBootloader
                | BuiltinAction::RebootRecovery => return action,
                BuiltinAction::WipeData => {
                    let visible = self.ctx.ui.is_text_visible();
                    let mut wipe = WipeOrchestrator::new(&mut *self.ctx);
                    if !visible {
                        wipe.wipe_data();
                        return BuiltinAction::NoAction;
                    }
                    if wipe.ask_to_wipe_data() {
                        wipe.wipe_data();
                    }
                }
                BuiltinAction::WipeCache => {
                    let visible = self.ctx.ui.is_text_visible();
                    WipeOrchestrator::new(&mut *self.ctx).wipe_cache(visible);
                    if !visible {
                        return BuiltinAction::NoAction;
                    }
                }
                BuiltinAction::WipeSystem => {
                    let visible = self.ctx.ui.is_text_visible();
                    WipeOrchestrator::new(&mut *self.ctx).wipe_system(visible);
                    if !visible {
                        return BuiltinAction::NoAction;
                    }
                }
                BuiltinAction::ApplyUpdate => {
                    status = self.apply_update();
                    if status == InstallResult::Success && !self.ctx.ui.is_text_visible() {
                        return BuiltinAction::NoAction;
                    }
                }
                BuiltinAction::ViewRecoveryLogs => {
                    self.choose_recovery_file();
                }
                BuiltinAction::MountSystem => self.mount_system(),
            }
        }
    }

    /// The apply-update submenu plus its aftermath; returns the new status.
    fn apply_update(&mut self) -> InstallResult {
        let report = self.show_apply_update_menu();
        let mut status = report.result;
        if status == InstallResult::None {
            return status;
        }
        if status == InstallResult::Success
            && report.wipe_cache
            && !WipeOrchestrator::new(&mut *self.ctx).wipe_cache(false)
        {
            status = InstallResult::Error;
        }

        if status == InstallResult::Success {
            if self.ctx.ui.is_text_visible() {
                self.ctx.print("\nInstall complete.");
            }
        } else {
            self.ctx.ui.set_progress(Progress::Empty);
            self.ctx.ui.set_background(Background::Error);
            self.ctx.print("Installation aborted.");
            self.ctx.copy_logs();
            self.ctx.ui.flush_keys();
            self.ctx.ui.wait_input_event();
        }
        status
    }

    /// Volumes offered as package sources.
    ///
    /// Emulated storage lives on user data, so it is hidden while data is
    /// encrypted or not mountable.
    #[must_use]
    pub fn update_sources(&self) -> Vec<Volume> {
        let userdata = self.ctx.userdata;
        self.ctx
            .volumes
            .storage_volumes()
            .into_iter()
            .filter(|volume| {
                volume.label != EMULATED_LABEL || (userdata.mountable && !userdata.encrypted)
            })
            .collect()
    }

    pub fn show_apply_update_menu(&mut self) -> InstallReport {
        loop {
            let sources = self.update_sources();
            let items = std::iter::once("Apply from ADB".to_string()).chain(
                sources
                    .iter()
                    .map(|volume| format!("Choose from {}", volume.label)),
            );
            let menu = MenuModel::new(["Apply update"], items).refreshable();

            match get_menu_selection(&mut *self.ctx.ui, &mut *self.ctx.device, &menu, 0) {
                MenuChoice::Refresh => {}
                MenuChoice::Back | MenuChoice::Home | MenuChoice::TimedOut => {
                    return InstallReport::new(InstallResult::None);
                }
                MenuChoice::Item(0) => return self.apply_from_adb(),
                MenuChoice::Item(index) => {
                    if let Some(volume) = sources.get(index - 1) {
                        return self.apply_from_storage(volume);
                    }
                }
            }
        }
    }

    /// Wait for a host to push a package; "Cancel sideload" abandons it.
    fn apply_from_adb(&mut self) -> InstallReport {
        let sideload = self.ctx.services.sideload.clone();
        if let Err(e) = sideload.start() {
            self.ctx.failure("start sideload", &e);
            return InstallReport::new(InstallResult::Error);
        }

        let menu = MenuModel::new(["ADB Sideload"], ["Cancel sideload"]).refreshable();
        // The transport refreshes the menu once a package has arrived.
        let report = match get_menu_selection(&mut *self.ctx.ui, &mut *self.ctx.device, &menu, 0) {
            MenuChoice::Refresh => match sideload.wait_for_package(false) {
                Some(package) => InstallOrchestrator::new(&mut *self.ctx).install_interactive(&package),
                None => InstallReport::new(InstallResult::Error),
            },
            _ => {
                sideload.wait_for_package(true);
                InstallReport::new(InstallResult::None)
            }
        };
        sideload.stop();
        report
    }

    pub fn apply_from_storage(&mut self, volume: &Volume) -> InstallReport {
        self.ctx.modified_flash = true;

        if let Err(e) = self.ctx.volumes.ensure_mounted(&volume.mount_point) {
            self.ctx.failure("mount storage", &e);
            return InstallReport::new(InstallResult::Error);
        }

        let outcome = browse_directory(
            &mut *self.ctx.ui,
            &mut *self.ctx.device,
            &volume.mount_point,
            &self.ctx.log,
        );
        let package = match outcome {
            BrowseOutcome::Home => return InstallReport::new(InstallResult::None),
            BrowseOutcome::Cancelled => {
                self.ctx.print("\n-- No package file selected.");
                self.unmount(volume);
                return InstallReport::new(InstallResult::None);
            }
            BrowseOutcome::Selected(package) => package,
        };

        self.ctx
            .print(&format!("\n-- Install {} ...", package.display()));
        let report = InstallOrchestrator::new(&mut *self.ctx).install_interactive(&package);
        self.unmount(volume);
        report
    }

    fn unmount(&mut self, volume: &Volume) {
        if let Err(e) = self.ctx.volumes.ensure_unmounted(&volume.mount_point) {
            self.ctx.failure("unmount storage", &e);
        }
    }

    /// Factory-reset prompt shown when the system could not boot.
    ///
    /// "Try again" is a success: the device just reboots.
    pub fn prompt_and_wipe_data(&mut self) -> bool {
        let menu =
            MenuModel::new([DATA_CORRUPT_HEADER], ["Try again", "Factory data reset"]).menu_only();
        loop {
            if get_menu_selection(&mut *self.ctx.ui, &mut *self.ctx.device, &menu, 0)
                != MenuChoice::Item(1)
            {
                return true;
            }
            let mut wipe = WipeOrchestrator::new(&mut *self.ctx);
            if wipe.ask_to_wipe_data() {
                return wipe.wipe_data();
            }
        }
    }

    /// Temporary log, then each kept generation of `last_log` and `last_kmsg`.
    #[must_use]
    pub fn log_entries(&self) -> Vec<PathBuf> {
        let paths = &self.ctx.config.paths;
        let mut entries = Vec::new();
        if paths.temporary_log.is_file() {
            entries.push(paths.temporary_log.clone());
        }
        if !self.ctx.has_cache {
            return entries;
        }
        for generation in 0..self.ctx.config.logging.keep_log_count {
            for base in [paths.last_log(), paths.last_kmsg()] {
                let path = if generation == 0 {
                    base
                } else {
                    let mut name = base.into_os_string();
                    name.push(format!(".{generation}"));
                    PathBuf::from(name)
                };
                if self.ctx.volumes.ensure_mounted(&path).is_ok() && path.is_file() {
                    entries.push(path);
                }
            }
        }
        entries
    }

    pub fn choose_recovery_file(&mut self) -> MenuChoice {
        let entries = self.log_entries();
        choose_log_file(&mut *self.ctx.ui, &mut *self.ctx.device, &entries)
    }

    fn mount_system(&mut self) {
        let system = self.ctx.config.paths.system_root.clone();
        match self.ctx.volumes.ensure_mounted(&system) {
            Ok(()) => self.ctx.print("Mounted /system."),
            Err(e) => self.ctx.failure("mount system", &e),
        }
    }
}

//! Terminal transitions: the power request and the final park.

#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::errors::{RecoveryError, Result};
use crate::platform::pal::PropertyStore;
use crate::ui::device::BuiltinAction;

/// Property that asks init to reboot or power off.
pub const POWERCTL_PROPERTY: &str = "sys.powerctl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalAction {
    Reboot,
    Shutdown,
    RebootBootloader,
    RebootRecovery,
}

impl TerminalAction {
    #[must_use]
    pub const fn from_builtin(action: BuiltinAction) -> Option<Self> {
        match action {
            BuiltinAction::Reboot => Some(Self::Reboot),
            BuiltinAction::Shutdown => Some(Self::Shutdown),
            BuiltinAction::RebootBootloader => Some(Self::RebootBootloader),
            BuiltinAction::RebootRecovery => Some(Self::RebootRecovery),
            _ => None,
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Reboot => "Rebooting...",
            Self::Shutdown => "Shutting down...",
            Self::RebootBootloader => "Rebooting to bootloader...",
            Self::RebootRecovery => "Rebooting to recovery...",
        }
    }

    /// Value for `sys.powerctl`. Only the plain reboot carries the quiescent
    /// suffix; explicit targets are requested as-is.
    #[must_use]
    pub fn powerctl_command(self, quiescent: bool) -> String {
        match self {
            Self::Reboot => reboot_command("reboot,", quiescent),
            Self::Shutdown => "shutdown,".to_string(),
            Self::RebootBootloader => "reboot,bootloader".to_string(),
            Self::RebootRecovery => "reboot,recovery".to_string(),
        }
    }
}

/// Reboot back into this mode to resume a retried install.
#[must_use]
pub fn resume_command(quiescent: bool) -> String {
    reboot_command("reboot,recovery", quiescent)
}

fn reboot_command(base: &str, quiescent: bool) -> String {
    if quiescent {
        format!("{base},quiescent")
    } else {
        base.to_string()
    }
}

pub trait PowerControl: Send + Sync {
    fn request(&self, command: &str) -> Result<()>;
}

/// Writes the request to `sys.powerctl`.
pub struct PropertyPowerControl {
    props: Arc<dyn PropertyStore>,
}

impl PropertyPowerControl {
    #[must_use]
    pub fn new(props: Arc<dyn PropertyStore>) -> Self {
        Self { props }
    }
}

impl PowerControl for PropertyPowerControl {
    fn request(&self, command: &str) -> Result<()> {
        self.props.set(POWERCTL_PROPERTY, command)
    }
}

/// Records requests instead of acting on them.
#[derive(Debug, Default)]
pub struct RecordingPowerControl {
    requests: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl RecordingPowerControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl PowerControl for RecordingPowerControl {
    fn request(&self, command: &str) -> Result<()> {
        if *self.fail.lock() {
            return Err(RecoveryError::Fatal {
                details: format!("power request {command:?} refused"),
            });
        }
        self.requests.lock().push(command.to_string());
        Ok(())
    }
}

/// Wait for init to act on the power request. Never returns.
pub fn park_forever() -> ! {
    loop {
        nix::unistd::pause();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pal::StaticProperties;

    #[test]
    fn powerctl_values() {
        assert_eq!(TerminalAction::Reboot.powerctl_command(false), "reboot,");
        assert_eq!(
            TerminalAction::Reboot.powerctl_command(true),
            "reboot,,quiescent"
        );
        assert_eq!(TerminalAction::Shutdown.powerctl_command(true), "shutdown,");
        assert_eq!(
            TerminalAction::RebootBootloader.powerctl_command(false),
            "reboot,bootloader"
        );
        assert_eq!(resume_command(false), "reboot,recovery");
        assert_eq!(resume_command(true), "reboot,recovery,quiescent");
    }

    #[test]
    fn builtin_mapping() {
        assert_eq!(
            TerminalAction::from_builtin(BuiltinAction::Shutdown),
            Some(TerminalAction::Shutdown)
        );
        assert_eq!(TerminalAction::from_builtin(BuiltinAction::WipeCache), None);
    }

    #[test]
    fn property_power_control_sets_powerctl() {
        let props = Arc::new(StaticProperties::new());
        let power = PropertyPowerControl::new(props.clone());
        power.request("reboot,").unwrap();
        assert_eq!(props.get(POWERCTL_PROPERTY).as_deref(), Some("reboot,"));
    }

    #[test]
    fn recording_power_control_can_refuse() {
        let power = RecordingPowerControl::new();
        power.request("shutdown,").unwrap();
        power.set_fail(true);
        assert!(power.request("reboot,").is_err());
        assert_eq!(power.requests(), vec!["shutdown,".to_string()]);
    }
}

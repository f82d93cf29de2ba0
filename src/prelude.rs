//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use recovery_control::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{RecoveryError, Result};

// Logging
pub use crate::logger::session::{LogHandle, RecoveryEvent};

// Platform
pub use crate::platform::pal::{PropertyStore, Volume, VolumeManager};

// Bootloader
pub use crate::bootloader::control_block::{ControlBlockDevice, ControlBlockRecord, ControlBlockStore};
pub use crate::bootloader::resolver::{ArgSource, ArgumentResolver, ResolvedArgs};

// Session
pub use crate::session::args::SessionArgs;
pub use crate::session::context::{Collaborators, SessionContext};
pub use crate::session::finalizer::SessionFinalizer;
pub use crate::session::retry::{RetryDecision, RetryLedger};
pub use crate::session::runner::{SessionEnd, SessionRunner};
pub use crate::session::terminal::{PowerControl, TerminalAction};

// Flows
pub use crate::install::orchestrator::{InstallOrchestrator, UpdateOutcome};
pub use crate::install::outcome::InstallResult;
pub use crate::ui::dispatcher::{MenuChoice, get_menu_selection};
pub use crate::wipe::erase::WipeOrchestrator;

//! Process wiring: configuration, logging, real collaborators, one session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use recovery_control::bootloader::control_block::SlottedControlBlock;
use recovery_control::core::config::Config;
use recovery_control::core::errors::RecoveryError;
use recovery_control::install::battery::{SysfsBattery, SystemClock};
use recovery_control::install::external::{CommandInstaller, SpoolSideload};
use recovery_control::logger::session::{SessionLoggerConfig, start_session_logging};
use recovery_control::platform::pal::{FstabVolumes, PropertyStore, SystemProperties};
use recovery_control::session::context::{Collaborators, SessionContext};
use recovery_control::session::runner::{QUIESCENT_PROPERTY, SessionEnd, SessionRunner};
use recovery_control::session::terminal::PropertyPowerControl;
use recovery_control::ui::device::make_device;
use recovery_control::ui::screen::{ConsoleUi, RecoveryUi, StubUi};
use recovery_control::wipe::ab::{CommandVerifier, FileStaging};
use recovery_control::wipe::secure::ByNameOpener;

/// Environment variable naming an explicit config file.
const CONFIG_ENV: &str = "RCV_CONFIG";

/// Where the host side of a sideload drops the package.
const SIDELOAD_SPOOL: &str = "/tmp/sideload/package.zip";

/// Startup failures; once a session runs, errors are logged instead.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[source] RecoveryError),
    #[error("{0}")]
    Platform(#[source] RecoveryError),
}

impl CliError {
    /// Process exit code contract for the binary.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Platform(_) => 2,
        }
    }
}

/// Run one session for `argv` and return how it ended.
///
/// The caller parks afterwards; init acts on the power request.
pub fn run(argv: &[String]) -> Result<SessionEnd, CliError> {
    let config_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).map_err(CliError::Config)?;

    let (log, _logger) = start_session_logging(SessionLoggerConfig::from_config(&config));
    let props: Arc<dyn PropertyStore> = Arc::new(SystemProperties);
    let volumes = Arc::new(
        FstabVolumes::load(&config.paths.volume_table).map_err(CliError::Platform)?,
    );

    let quiescent = props.get_bool(QUIESCENT_PROPERTY, false);
    let ui: Box<dyn RecoveryUi> = if quiescent {
        Box::new(StubUi)
    } else {
        Box::new(ConsoleUi::spawn(Duration::from_secs(
            config.ui.input_timeout_secs,
        )))
    };
    let device = make_device(&props.get_or("ro.build.product", ""));
    log.info(format!("Device variant: {}", device.name()));

    let by_name = config
        .paths
        .control_block
        .parent()
        .map_or_else(|| PathBuf::from("/dev/block/by-name"), Path::to_path_buf);

    let parts = Collaborators {
        volumes,
        props: props.clone(),
        control_block: Arc::new(SlottedControlBlock::new(&config.paths.control_block)),
        installer: Arc::new(CommandInstaller::new(&config.install.updater_binary)),
        verifier: Arc::new(CommandVerifier::new(&config.install.verifier_binary)),
        staging: Arc::new(FileStaging::new(&config.paths.control_block)),
        sideload: Arc::new(SpoolSideload::new(SIDELOAD_SPOOL)),
        partitions: Arc::new(ByNameOpener::new(by_name)),
        battery: Arc::new(SysfsBattery::default()),
        clock: Arc::new(SystemClock::default()),
        power: Arc::new(PropertyPowerControl::new(props)),
        ui,
        device,
    };

    let mut ctx = SessionContext::new(config, log.clone(), parts);
    let end = SessionRunner::new(&mut ctx).run(argv);
    log.flush();
    Ok(end)
}

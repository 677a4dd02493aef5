//! `keepalive run` and the hidden `keepalive relaunch`.

use std::process::ExitCode;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use keepalive_core::{ConfigStore, FileStore, ServiceAction, ServiceStatus};
use keepalive_service::{claim_marker, start_blocking, Launch, ServiceError, Stickiness};

use super::home_dir;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Launched by a supervisor after the service died, not by a user request.
    #[arg(long)]
    pub resurrected: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<ExitCode> {
        let home = home_dir()?;
        match start_blocking(
            &home,
            Launch {
                resurrected: self.resurrected,
            },
        ) {
            Ok(stickiness) => Ok(exit_code(stickiness)),
            // Exit cleanly so a supervisor does not keep relaunching a duplicate.
            Err(ServiceError::AlreadyRunning { socket }) => {
                eprintln!("service is already running ({})", socket.display());
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => Err(err).context("service exited with error"),
        }
    }
}

#[derive(Args, Debug)]
pub struct RelaunchArgs {
    /// Delay before re-entering the service.
    #[arg(long)]
    pub after_ms: u64,

    /// Marker token issued when the restart was scheduled.
    #[arg(long)]
    pub token: String,
}

impl RelaunchArgs {
    pub fn run(self) -> Result<ExitCode> {
        let home = home_dir()?;
        sleep(Duration::from_millis(self.after_ms));

        if !claim_marker(&home, &self.token).context("failed to read restart marker")? {
            // Cancelled, or superseded by a newer schedule.
            return Ok(ExitCode::SUCCESS);
        }

        let store = FileStore::at(&home);
        let persisted = store
            .load_service_status()
            .context("failed to load persisted service status")?;
        if persisted.action == ServiceAction::Stop {
            // Stopped while the restart was pending.
            return Ok(ExitCode::SUCCESS);
        }

        store
            .save_service_status(&ServiceStatus::new(ServiceAction::Restart))
            .context("failed to persist restart action")?;
        RunArgs { resurrected: true }.run()
    }
}

fn exit_code(stickiness: Stickiness) -> ExitCode {
    u8::try_from(stickiness.exit_code())
        .map(ExitCode::from)
        .unwrap_or(ExitCode::FAILURE)
}

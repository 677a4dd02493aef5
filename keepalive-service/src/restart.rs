//! Auto-restart arrangement.
//!
//! The host arranger records a marker under `run/restart.json` and spawns a
//! detached `keepalive relaunch --after-ms N --token T`. The relaunch only
//! proceeds if the marker still carries its token, so cancelling is just
//! deleting the marker.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, ServiceError};
use crate::paths::restart_marker_path;

/// Arranges for the service to be re-entered later. Implemented by the host.
pub trait RestartArranger: Send {
    fn schedule_restart(&mut self, delay: Duration) -> Result<(), ServiceError>;
    fn cancel_scheduled_restart(&mut self) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartMarker {
    pub token: String,
    pub delay_ms: u64,
    pub due_at: DateTime<Utc>,
}

pub struct RelaunchArranger {
    home: PathBuf,
    program: PathBuf,
}

impl RelaunchArranger {
    /// `program` is the `keepalive` binary the relaunch is spawned from.
    pub fn new(home: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            program: program.into(),
        }
    }
}

impl RestartArranger for RelaunchArranger {
    fn schedule_restart(&mut self, delay: Duration) -> Result<(), ServiceError> {
        let delay_ms = delay.as_millis() as u64;
        let marker = RestartMarker {
            token: new_token(),
            delay_ms,
            due_at: Utc::now() + chrono::Duration::milliseconds(delay_ms as i64),
        };
        write_marker(&self.home, &marker)?;

        Command::new(&self.program)
            .arg("relaunch")
            .arg("--after-ms")
            .arg(delay_ms.to_string())
            .arg("--token")
            .arg(&marker.token)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| io_err(&self.program, e))?;

        tracing::info!(delay_ms, token = %marker.token, "restart scheduled");
        Ok(())
    }

    fn cancel_scheduled_restart(&mut self) -> Result<(), ServiceError> {
        discard_marker(&self.home).map(|_| ())
    }
}

/// Delete any pending restart marker, turning its relaunch into a no-op.
/// Returns whether a marker was removed. Usable without a running service.
pub fn discard_marker(home: &Path) -> Result<bool, ServiceError> {
    let path = restart_marker_path(home);
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::info!("scheduled restart cancelled");
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(&path, err)),
    }
}

pub fn read_marker(home: &Path) -> Result<Option<RestartMarker>, ServiceError> {
    let path = restart_marker_path(home);
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(&path, err)),
    }
}

/// Consume the marker if it still carries `token`. Returns whether the
/// relaunch may proceed.
pub fn claim_marker(home: &Path, token: &str) -> Result<bool, ServiceError> {
    match read_marker(home)? {
        Some(marker) if marker.token == token => {
            let path = restart_marker_path(home);
            fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn write_marker(home: &Path, marker: &RestartMarker) -> Result<(), ServiceError> {
    let path = restart_marker_path(home);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(marker)?).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

fn new_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{nanos:x}-{}", std::process::id())
}

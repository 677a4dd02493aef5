use std::path::PathBuf;

use thiserror::Error;

/// Error surface of the service crate.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] keepalive_core::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("service protocol error: {0}")]
    Protocol(String),

    #[error("callback bridge error: {0}")]
    Bridge(String),

    #[error("failed to acquire {kind} lock: {reason}")]
    LockAcquisition { kind: &'static str, reason: String },

    #[error("service is not running (socket missing: {socket})")]
    ServiceNotRunning { socket: PathBuf },

    #[error("service is already running (socket in use: {socket})")]
    AlreadyRunning { socket: PathBuf },

    #[error("launchd error: {0}")]
    Launchd(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ServiceError {
    ServiceError::Io {
        path: path.into(),
        source,
    }
}

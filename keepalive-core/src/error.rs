//! Error types for keepalive-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration store and host config access.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure (permission denied, disk full, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.keepalive/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A record parsed but carries a value the service cannot use.
    #[error("invalid value in {record}: {reason}")]
    Invalid {
        record: &'static str,
        reason: String,
    },
}

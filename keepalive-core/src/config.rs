//! Host configuration: `<home>/.keepalive/config.yaml`.
//!
//! Maps callback handles to runnable entry points and carries the service
//! flags and timing knobs of the host. A missing file yields the defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::home;
use crate::types::CallbackHandle;

/// Delay before re-entry after the service died without a STOP.
pub const DEFAULT_CRASH_RESTART_DELAY_MS: u64 = 5_000;
/// Delay before re-entry after the user removed the host task.
pub const DEFAULT_TASK_REMOVED_RESTART_DELAY_MS: u64 = 1_000;
/// Upper bound on a bridge request before it resolves as timed out.
pub const DEFAULT_BRIDGE_TIMEOUT_MS: u64 = 10_000;

/// Service declaration flags, tested bit by bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceFlags(pub u32);

impl ServiceFlags {
    /// The service stops together with the host task instead of outliving it.
    pub const STOP_WITH_TASK: u32 = 0x1;

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn stop_with_task(self) -> bool {
        self.contains(Self::STOP_WITH_TASK)
    }
}

/// A command the callback bridge spawns for a given handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub callbacks: BTreeMap<CallbackHandle, EntryPoint>,
    #[serde(default)]
    pub service_flags: ServiceFlags,
    #[serde(default = "default_crash_delay")]
    pub crash_restart_delay_ms: u64,
    #[serde(default = "default_task_removed_delay")]
    pub task_removed_restart_delay_ms: u64,
    #[serde(default = "default_bridge_timeout")]
    pub bridge_timeout_ms: u64,
}

fn default_crash_delay() -> u64 {
    DEFAULT_CRASH_RESTART_DELAY_MS
}

fn default_task_removed_delay() -> u64 {
    DEFAULT_TASK_REMOVED_RESTART_DELAY_MS
}

fn default_bridge_timeout() -> u64 {
    DEFAULT_BRIDGE_TIMEOUT_MS
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            callbacks: BTreeMap::new(),
            service_flags: ServiceFlags::default(),
            crash_restart_delay_ms: DEFAULT_CRASH_RESTART_DELAY_MS,
            task_removed_restart_delay_ms: DEFAULT_TASK_REMOVED_RESTART_DELAY_MS,
            bridge_timeout_ms: DEFAULT_BRIDGE_TIMEOUT_MS,
        }
    }
}

impl HostConfig {
    pub fn crash_restart_delay(&self) -> Duration {
        Duration::from_millis(self.crash_restart_delay_ms)
    }

    pub fn task_removed_restart_delay(&self) -> Duration {
        Duration::from_millis(self.task_removed_restart_delay_ms)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }

    pub fn entry_point(&self, handle: CallbackHandle) -> Option<&EntryPoint> {
        self.callbacks.get(&handle)
    }
}

/// `<home>/.keepalive/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".keepalive").join("config.yaml")
}

/// Load the host configuration, or the defaults when the file is absent.
pub fn load_at(home: &Path) -> Result<HostConfig, StoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(HostConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: HostConfig = serde_yaml::from_str(&contents)
        .map_err(|e| StoreError::Parse { path, source: e })?;
    if config.bridge_timeout_ms == 0 {
        return Err(StoreError::Invalid {
            record: "config.yaml",
            reason: "bridge_timeout_ms must be greater than zero".to_string(),
        });
    }
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<HostConfig, StoreError> {
    load_at(&home()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn flag_test_is_a_bit_test_not_an_equality() {
        let flags = ServiceFlags(0b110 | ServiceFlags::STOP_WITH_TASK);
        assert!(flags.stop_with_task());
        assert!(flags.contains(0b100));
        assert!(!ServiceFlags(0b110).stop_with_task());
    }

    #[test]
    fn missing_config_yields_defaults() {
        let home = TempDir::new().expect("tempdir");
        let config = load_at(home.path()).expect("load");
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.crash_restart_delay(), Duration::from_secs(5));
        assert_eq!(config.task_removed_restart_delay(), Duration::from_secs(1));
    }

    #[test]
    fn callbacks_are_keyed_by_handle() {
        let home = TempDir::new().expect("tempdir");
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "callbacks:\n  7:\n    command: /usr/bin/my-task\n    args: [\"--verbose\"]\nservice_flags: 1\n",
        )
        .unwrap();

        let config = load_at(home.path()).expect("load");
        let entry = config.entry_point(CallbackHandle(7)).expect("entry point");
        assert_eq!(entry.command, PathBuf::from("/usr/bin/my-task"));
        assert_eq!(entry.args, vec!["--verbose".to_string()]);
        assert!(config.service_flags.stop_with_task());
        assert!(config.entry_point(CallbackHandle(8)).is_none());
    }

    #[test]
    fn zero_bridge_timeout_is_rejected() {
        let home = TempDir::new().expect("tempdir");
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "bridge_timeout_ms: 0\n").unwrap();
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }), "got: {err}");
    }
}

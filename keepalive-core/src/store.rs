//! Persisted configuration store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.keepalive/
//!   store/
//!     service_status.yaml
//!     task_options.yaml
//!     task_callback.yaml
//!     notification_options.yaml
//!     notification_content.yaml
//! ```
//!
//! The application layer writes records (via [`FileStore`]'s `save_*` methods)
//! before raising a lifecycle signal; the reconciler only ever reads them
//! through [`ConfigStore`]. A missing file loads as the record's default.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::types::{
    NotificationContent, NotificationOptions, ServiceStatus, TaskCallbackConfig, TaskOptions,
};

/// Read side of the configuration store, as consumed by the reconciler.
pub trait ConfigStore: Send + Sync {
    fn load_service_status(&self) -> Result<ServiceStatus, StoreError>;
    fn load_task_options(&self) -> Result<TaskOptions, StoreError>;
    fn load_task_callback(&self) -> Result<TaskCallbackConfig, StoreError>;
    fn load_notification_options(&self) -> Result<NotificationOptions, StoreError>;
    fn load_notification_content(&self) -> Result<NotificationContent, StoreError>;
}

/// One file per record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    ServiceStatus,
    TaskOptions,
    TaskCallback,
    NotificationOptions,
    NotificationContent,
}

impl Record {
    pub fn file_name(self) -> &'static str {
        match self {
            Record::ServiceStatus => "service_status.yaml",
            Record::TaskOptions => "task_options.yaml",
            Record::TaskCallback => "task_callback.yaml",
            Record::NotificationOptions => "notification_options.yaml",
            Record::NotificationContent => "notification_content.yaml",
        }
    }
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.keepalive/store/`: pure, no I/O.
pub fn store_dir_at(home: &Path) -> PathBuf {
    home.join(".keepalive").join("store")
}

// ---------------------------------------------------------------------------
// 2. File-backed store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store rooted at `<home>/.keepalive/store/`. Nothing is created until the first save.
    pub fn at(home: &Path) -> Self {
        Self {
            dir: store_dir_at(home),
        }
    }

    /// `at` convenience wrapper: uses `dirs::home_dir()`.
    pub fn open() -> Result<Self, StoreError> {
        Ok(Self::at(&home()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, record: Record) -> PathBuf {
        self.dir.join(record.file_name())
    }

    pub fn save_service_status(&self, value: &ServiceStatus) -> Result<(), StoreError> {
        self.save(Record::ServiceStatus, value)
    }

    pub fn save_task_options(&self, value: &TaskOptions) -> Result<(), StoreError> {
        self.save(Record::TaskOptions, value)
    }

    pub fn save_task_callback(&self, value: &TaskCallbackConfig) -> Result<(), StoreError> {
        self.save(Record::TaskCallback, value)
    }

    pub fn save_notification_options(&self, value: &NotificationOptions) -> Result<(), StoreError> {
        self.save(Record::NotificationOptions, value)
    }

    pub fn save_notification_content(&self, value: &NotificationContent) -> Result<(), StoreError> {
        self.save(Record::NotificationContent, value)
    }

    fn load<T: DeserializeOwned + Default>(&self, record: Record) -> Result<T, StoreError> {
        let path = self.record_path(record);
        if !path.exists() {
            return Ok(T::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        if contents.trim().is_empty() {
            return Ok(T::default());
        }
        serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
    }

    /// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
    fn save<T: Serialize>(&self, record: Record, value: &T) -> Result<(), StoreError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
            set_dir_permissions(&self.dir)?;
        }
        let path = self.record_path(record);
        let tmp_path = path.with_file_name(format!("{}.tmp", record.file_name()));

        let yaml = serde_yaml::to_string(value)?;
        std::fs::write(&tmp_path, yaml)?;
        set_file_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

impl ConfigStore for FileStore {
    fn load_service_status(&self) -> Result<ServiceStatus, StoreError> {
        self.load(Record::ServiceStatus)
    }

    fn load_task_options(&self) -> Result<TaskOptions, StoreError> {
        self.load(Record::TaskOptions)
    }

    fn load_task_callback(&self) -> Result<TaskCallbackConfig, StoreError> {
        self.load(Record::TaskCallback)
    }

    fn load_notification_options(&self) -> Result<NotificationOptions, StoreError> {
        self.load(Record::NotificationOptions)
    }

    fn load_notification_content(&self) -> Result<NotificationContent, StoreError> {
        self.load(Record::NotificationContent)
    }
}

// ---------------------------------------------------------------------------
// 3. In-memory store
// ---------------------------------------------------------------------------

/// Everything the reconciler reads, held together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredConfig {
    pub status: ServiceStatus,
    pub task_options: TaskOptions,
    pub task_callback: TaskCallbackConfig,
    pub notification_options: NotificationOptions,
    pub notification_content: NotificationContent,
}

/// Store for embedders that keep configuration in their own memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoredConfig>,
}

impl MemoryStore {
    pub fn new(config: StoredConfig) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }

    /// Apply `f` to the stored configuration under the lock.
    pub fn update(&self, f: impl FnOnce(&mut StoredConfig)) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    pub fn snapshot(&self) -> StoredConfig {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ConfigStore for MemoryStore {
    fn load_service_status(&self) -> Result<ServiceStatus, StoreError> {
        Ok(self.snapshot().status)
    }

    fn load_task_options(&self) -> Result<TaskOptions, StoreError> {
        Ok(self.snapshot().task_options)
    }

    fn load_task_callback(&self) -> Result<TaskCallbackConfig, StoreError> {
        Ok(self.snapshot().task_callback)
    }

    fn load_notification_options(&self) -> Result<NotificationOptions, StoreError> {
        Ok(self.snapshot().notification_options)
    }

    fn load_notification_content(&self) -> Result<NotificationContent, StoreError> {
        Ok(self.snapshot().notification_content)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

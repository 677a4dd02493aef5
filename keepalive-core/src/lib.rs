//! Keepalive core library: persisted configuration types, store, host config.
//!
//! Public API surface:
//! - [`types`]: service status, task options, notification records
//! - [`store`]: [`ConfigStore`] contract plus file-backed and in-memory stores
//! - [`config`]: host configuration (`config.yaml`)
//! - [`error`]: [`StoreError`]

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{EntryPoint, HostConfig, ServiceFlags};
pub use error::StoreError;
pub use store::{ConfigStore, FileStore, MemoryStore, Record, StoredConfig};
pub use types::{
    CallbackHandle, ChannelImportance, EventAction, EventType, NotificationButton,
    NotificationContent, NotificationIcon, NotificationOptions, NotificationPriority,
    NotificationVisibility, ServiceAction, ServiceStatus, TaskCallbackConfig, TaskOptions,
};

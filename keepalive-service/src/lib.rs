//! Keepalive service: lifecycle reconciler and its host runtime.
//!
//! - [`reconciler`]: decides and drives every lifecycle transition
//! - [`scheduler`], [`resources`], [`bridge`], [`notification`], [`restart`]: the
//!   collaborators it drives
//! - `runtime`, [`protocol`], [`engine`], [`launchd`]: the desktop host

pub mod bridge;
pub mod engine;
mod error;
pub mod launchd;
pub mod notification;
pub mod observer;
pub mod paths;
pub mod protocol;
pub mod reconciler;
pub mod resources;
pub mod restart;
mod runtime;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use bridge::{CallbackBridge, Engine, EngineContext, InvokeOutcome, MethodReply};
pub use engine::ProcessEngine;
pub use error::ServiceError;
pub use launchd::{
    generate_plist, install as install_launchd, uninstall as uninstall_launchd, AgentSpec,
};
pub use notification::{FilePresenter, NotificationHandle, NotificationPresenter, PresentationRequest};
pub use observer::{LifecycleListener, ObserverRegistry};
pub use protocol::{
    request_event, request_send, request_signal, request_status, request_task_removed,
    send_request, ServiceRequest, ServiceResponse,
};
pub use reconciler::{
    Collaborators, ExternalEvent, Reconciler, ReconcilerSettings, SessionStatus, Signal,
    Stickiness, TaskRemovedDirective,
};
pub use resources::{InProcessLocks, Lock, LockKind, LockProvider, SessionResources};
pub use restart::{claim_marker, discard_marker, RelaunchArranger, RestartArranger};
pub use runtime::{init_tracing, run, spawn_service, start_blocking, Launch, ServiceHandle};
pub use scheduler::{RepeatScheduler, TimerGauge};

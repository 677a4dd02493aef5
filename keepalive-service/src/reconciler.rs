//! Lifecycle reconciler.
//!
//! On every lifecycle signal the reconciler re-reads the persisted
//! configuration, diffs it against the snapshot from the previous signal,
//! and drives the notification presenter, session resources, callback bridge
//! and repeat scheduler into the desired state. All mutation happens on the
//! single task that owns the [`Reconciler`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keepalive_core::{
    CallbackHandle, ConfigStore, EventAction, HostConfig, NotificationContent, NotificationOptions,
    ServiceAction, ServiceFlags, TaskCallbackConfig, TaskOptions,
};
use serde::Serialize;

use crate::bridge::{
    CallbackBridge, Engine, METHOD_BUTTON_PRESSED, METHOD_NOTIFICATION_DISMISSED,
    METHOD_NOTIFICATION_PRESSED, METHOD_RECEIVE_DATA,
};
use crate::error::ServiceError;
use crate::notification::{
    build_presentation_request, needs_action_rebuild, ActionIdentities, NotificationHandle,
    NotificationPresenter,
};
use crate::observer::ObserverRegistry;
use crate::resources::{LockKind, LockProvider, SessionResources};
use crate::restart::RestartArranger;
use crate::scheduler::RepeatScheduler;

/// Called from the timer with the generation of the firing; must hand the
/// firing back to the owner task without blocking.
pub type FireSink = Arc<dyn Fn(u64) -> Result<(), ServiceError> + Send + Sync>;

// ---------------------------------------------------------------------------
// Signals and directives
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signal {
    /// Action named by whoever raised the signal. The persisted status wins;
    /// this is only used when the status cannot be read.
    pub action: Option<ServiceAction>,
    /// False when the OS resurrected the process on its own.
    pub external_trigger: bool,
}

impl Signal {
    pub fn external(action: ServiceAction) -> Self {
        Self {
            action: Some(action),
            external_trigger: true,
        }
    }

    pub fn resurrected() -> Self {
        Self {
            action: None,
            external_trigger: false,
        }
    }
}

/// Whether the host should bring the service back if it dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stickiness {
    Sticky,
    NotSticky,
}

impl Stickiness {
    /// Process exit code for hosts that supervise by exit status.
    pub fn exit_code(self) -> i32 {
        match self {
            Stickiness::NotSticky => 0,
            Stickiness::Sticky => 75,
        }
    }
}

impl fmt::Display for Stickiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stickiness::Sticky => f.write_str("sticky"),
            Stickiness::NotSticky => f.write_str("not_sticky"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRemovedDirective {
    /// The host must stop the service now.
    StopSelf,
    RestartScheduled,
}

/// Platform events routed back to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalEvent {
    NotificationPressed,
    NotificationDismissed,
    ButtonPressed,
}

impl ExternalEvent {
    pub fn method(self) -> &'static str {
        match self {
            ExternalEvent::NotificationPressed => METHOD_NOTIFICATION_PRESSED,
            ExternalEvent::NotificationDismissed => METHOD_NOTIFICATION_DISMISSED,
            ExternalEvent::ButtonPressed => METHOD_BUTTON_PRESSED,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pressed" | "notification-pressed" => Some(ExternalEvent::NotificationPressed),
            "dismissed" | "notification-dismissed" => Some(ExternalEvent::NotificationDismissed),
            "button" | "button-pressed" => Some(ExternalEvent::ButtonPressed),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots and planning
// ---------------------------------------------------------------------------

/// Everything read from the store for one signal, except the status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub task_options: TaskOptions,
    pub task_callback: TaskCallbackConfig,
    pub notification_options: NotificationOptions,
    pub notification_content: NotificationContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Present, release + acquire, then recreate the bridge.
    Establish,
    /// Refresh the notification in place, then at most one of the two.
    Update {
        rebuild_bridge: bool,
        restart_scheduler: bool,
    },
    Stop,
}

/// Decide what a signal requires. `previous` is `None` when no session is
/// running, in which case an update falls back to full establishment.
pub fn plan(
    action: ServiceAction,
    external_trigger: bool,
    previous: Option<&Snapshot>,
    current: &Snapshot,
) -> Plan {
    match action {
        ServiceAction::Start | ServiceAction::Reboot | ServiceAction::Restart => Plan::Establish,
        ServiceAction::Stop => Plan::Stop,
        ServiceAction::Update if !external_trigger => Plan::Establish,
        ServiceAction::Update => match previous {
            None => Plan::Establish,
            Some(previous) => {
                let rebuild_bridge =
                    previous.task_callback.callback_handle != current.task_callback.callback_handle;
                let restart_scheduler = !rebuild_bridge
                    && previous.task_options.event_action != current.task_options.event_action;
                Plan::Update {
                    rebuild_bridge,
                    restart_scheduler,
                }
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub flags: ServiceFlags,
    pub crash_restart_delay: Duration,
    pub task_removed_restart_delay: Duration,
    pub bridge_timeout: Duration,
}

impl From<&HostConfig> for ReconcilerSettings {
    fn from(config: &HostConfig) -> Self {
        Self {
            flags: config.service_flags,
            crash_restart_delay: config.crash_restart_delay(),
            task_removed_restart_delay: config.task_removed_restart_delay(),
            bridge_timeout: config.bridge_timeout(),
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from(&HostConfig::default())
    }
}

pub struct Collaborators {
    pub store: Arc<dyn ConfigStore>,
    pub presenter: Box<dyn NotificationPresenter>,
    pub restarts: Box<dyn RestartArranger>,
    pub locks: Arc<dyn LockProvider>,
    pub engine: Arc<dyn Engine>,
    pub observers: ObserverRegistry,
}

/// Point-in-time view of the session, served to status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub running: bool,
    pub last_action: Option<ServiceAction>,
    pub callback_handle: Option<CallbackHandle>,
    pub event_action: Option<String>,
    pub bridge_live: bool,
    pub timer_armed: bool,
    pub notification: Option<NotificationHandle>,
    pub wake_lock: bool,
    pub network_lock: bool,
}

pub struct Reconciler {
    store: Arc<dyn ConfigStore>,
    presenter: Box<dyn NotificationPresenter>,
    restarts: Box<dyn RestartArranger>,
    resources: SessionResources,
    bridge: CallbackBridge,
    scheduler: RepeatScheduler,
    fire_sink: FireSink,
    settings: ReconcilerSettings,
    identities: ActionIdentities,
    previous: Option<Snapshot>,
    current: Option<Snapshot>,
    last_action: Option<ServiceAction>,
    notification: Option<NotificationHandle>,
    running: bool,
}

impl Reconciler {
    pub fn new(collaborators: Collaborators, settings: ReconcilerSettings, fire_sink: FireSink) -> Self {
        let Collaborators {
            store,
            presenter,
            restarts,
            locks,
            engine,
            observers,
        } = collaborators;
        Self {
            store,
            presenter,
            restarts,
            resources: SessionResources::new(locks),
            bridge: CallbackBridge::new(engine, observers, settings.bridge_timeout),
            scheduler: RepeatScheduler::new(),
            fire_sink,
            settings,
            identities: ActionIdentities::new(),
            previous: None,
            current: None,
            last_action: None,
            notification: None,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// True once a STOP signal has torn the session down.
    pub fn stop_requested(&self) -> bool {
        self.last_action == Some(ServiceAction::Stop) && !self.running
    }

    pub fn scheduler(&self) -> &RepeatScheduler {
        &self.scheduler
    }

    pub fn status(&self) -> SessionStatus {
        let current = self.current.as_ref();
        SessionStatus {
            running: self.running,
            last_action: self.last_action,
            callback_handle: current.and_then(|s| s.task_callback.callback_handle),
            event_action: current.map(|s| s.task_options.event_action.to_string()),
            bridge_live: self.bridge.is_live(),
            timer_armed: self.scheduler.is_armed(),
            notification: self.notification,
            wake_lock: self.resources.holds(LockKind::Wake),
            network_lock: self.resources.holds(LockKind::Network),
        }
    }

    /// Reconcile the session against the store for one lifecycle signal.
    pub async fn on_signal(&mut self, signal: Signal) -> Stickiness {
        let (action, status_ok) = self.load_action(signal.action);
        self.last_action = Some(action);

        let (snapshot, snapshot_ok) = self.load_snapshot();
        self.previous = self.current.replace(snapshot);

        let plan = if !(status_ok && snapshot_ok) && action != ServiceAction::Stop {
            tracing::warn!(%action, "configuration load degraded; re-establishing the session");
            Plan::Establish
        } else {
            let previous = if self.running { self.previous.as_ref() } else { None };
            match self.current.as_ref() {
                Some(current) => plan(action, signal.external_trigger, previous, current),
                None => Plan::Establish,
            }
        };
        tracing::info!(
            %action,
            external_trigger = signal.external_trigger,
            ?plan,
            "lifecycle signal",
        );

        match plan {
            Plan::Establish => self.establish(action).await,
            Plan::Update {
                rebuild_bridge,
                restart_scheduler,
            } => {
                self.present_notification();
                if rebuild_bridge {
                    self.execute_callback().await;
                } else if restart_scheduler {
                    self.start_scheduler();
                }
            }
            Plan::Stop => {
                if let Err(err) = self.restarts.cancel_scheduled_restart() {
                    tracing::warn!(error = %err, "failed to cancel scheduled restart");
                }
                self.teardown().await;
                return Stickiness::NotSticky;
            }
        }
        self.stickiness()
    }

    /// Deliver a repeat firing unless it belongs to a replaced timer.
    pub fn on_repeat_fired(&mut self, generation: u64) {
        if !self.running || !self.scheduler.is_current(generation) {
            tracing::debug!(generation, "stale repeat firing dropped");
            return;
        }
        if let Err(err) = self.bridge.invoke_repeat_event() {
            tracing::error!(generation, error = %err, "repeat event delivery failed");
        }
    }

    /// The user removed the host task.
    pub fn on_task_removed(&mut self) -> TaskRemovedDirective {
        if self.settings.flags.stop_with_task() {
            tracing::info!("task removed; stopping with it");
            return TaskRemovedDirective::StopSelf;
        }
        self.schedule_restart(self.settings.task_removed_restart_delay, "task removed");
        TaskRemovedDirective::RestartScheduled
    }

    /// The host is destroying the service. Tears the session down and, unless
    /// this follows a STOP or the service stops with its task, arranges one
    /// re-entry.
    pub async fn on_terminated(&mut self) -> Stickiness {
        self.teardown().await;

        let action = match self.last_action {
            Some(action) => action,
            None => self.load_action(None).0,
        };
        if action == ServiceAction::Stop {
            return Stickiness::NotSticky;
        }
        if self.settings.flags.stop_with_task() {
            tracing::info!(%action, "service terminated; stops with its task, no restart");
            return Stickiness::NotSticky;
        }
        tracing::error!(%action, "service terminated without STOP");
        self.schedule_restart(self.settings.crash_restart_delay, "unexpected termination");
        Stickiness::Sticky
    }

    pub fn on_external_event(&mut self, event: ExternalEvent, payload: Option<String>) {
        if let Err(err) = self.bridge.relay(event.method(), payload) {
            tracing::warn!(?event, error = %err, "failed to relay external event");
        }
    }

    /// Relay application data; dropped unless a session is running.
    pub fn send_data(&mut self, payload: String) -> bool {
        if !self.running {
            tracing::debug!("data dropped; no running session");
            return false;
        }
        match self.bridge.relay(METHOD_RECEIVE_DATA, Some(payload)) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "failed to relay data");
                false
            }
        }
    }

    // --- internals ---------------------------------------------------------

    fn stickiness(&self) -> Stickiness {
        if self.settings.flags.stop_with_task() {
            Stickiness::NotSticky
        } else {
            Stickiness::Sticky
        }
    }

    fn load_action(&self, hint: Option<ServiceAction>) -> (ServiceAction, bool) {
        match self.store.load_service_status() {
            Ok(status) => {
                if let Some(hint) = hint {
                    if hint != status.action {
                        tracing::debug!(%hint, stored = %status.action, "signal hint differs from stored status");
                    }
                }
                (status.action, true)
            }
            Err(err) => {
                let fallback = hint.or(self.last_action).unwrap_or_default();
                tracing::warn!(error = %err, %fallback, "failed to load service status");
                (fallback, false)
            }
        }
    }

    fn load_snapshot(&self) -> (Snapshot, bool) {
        let fallback = self.current.clone().unwrap_or_default();
        let mut ok = true;
        let snapshot = Snapshot {
            task_options: take_record(
                &mut ok,
                "task_options",
                self.store.load_task_options(),
                fallback.task_options,
            ),
            task_callback: take_record(
                &mut ok,
                "task_callback",
                self.store.load_task_callback(),
                fallback.task_callback,
            ),
            notification_options: take_record(
                &mut ok,
                "notification_options",
                self.store.load_notification_options(),
                fallback.notification_options,
            ),
            notification_content: take_record(
                &mut ok,
                "notification_content",
                self.store.load_notification_content(),
                fallback.notification_content,
            ),
        };
        (snapshot, ok)
    }

    async fn establish(&mut self, action: ServiceAction) {
        tracing::info!(%action, "establishing session");
        self.present_notification();
        if let Some(current) = self.current.as_ref() {
            self.resources.release();
            self.resources.acquire(&current.task_options);
        }
        self.running = true;
        self.execute_callback().await;
    }

    /// Destroy the old bridge, create a new one, invoke start.
    async fn execute_callback(&mut self) {
        let Some(handle) = self
            .current
            .as_ref()
            .and_then(|current| current.task_callback.callback_handle)
        else {
            tracing::info!("no callback handle configured; bridge skipped");
            return;
        };

        self.destroy_task().await;
        self.bridge.destroy_context();
        if let Err(err) = self.bridge.create_context(handle) {
            tracing::error!(%handle, error = %err, "failed to create execution context");
            return;
        }

        let outcome = self.bridge.invoke_start().await;
        if outcome.is_success() {
            self.start_scheduler();
        } else {
            tracing::warn!(%handle, %outcome, "start not acknowledged; repeat events stay idle");
        }
    }

    async fn destroy_task(&mut self) {
        self.scheduler.stop();
        if self.bridge.is_live() {
            let outcome = self.bridge.invoke_destroy().await;
            tracing::debug!(%outcome, "destroy request resolved");
        }
    }

    fn start_scheduler(&mut self) {
        let action: EventAction = self
            .current
            .as_ref()
            .map(|current| current.task_options.event_action)
            .unwrap_or_default();
        let sink = self.fire_sink.clone();
        let generation = self.scheduler.start(action, move |generation| sink(generation));
        tracing::info!(%action, generation, "repeat scheduler started");
    }

    fn present_notification(&mut self) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        let previous = self.previous.as_ref().map(|s| &s.notification_content);
        let rebuild = needs_action_rebuild(previous, &current.notification_content);
        let generation = self.identities.refresh(rebuild);
        let request = build_presentation_request(
            &current.notification_options,
            &current.notification_content,
            generation,
            rebuild,
        );
        match self.presenter.present(&request) {
            Ok(handle) => self.notification = Some(handle),
            Err(err) => tracing::warn!(error = %err, "failed to present notification"),
        }
    }

    /// Stop scheduler, invoke destroy, tear down bridge, release resources,
    /// dismiss notification. Idempotent.
    async fn teardown(&mut self) {
        self.destroy_task().await;
        self.bridge.destroy_context();
        self.resources.release();
        if self.notification.take().is_some() {
            if let Err(err) = self.presenter.dismiss() {
                tracing::warn!(error = %err, "failed to dismiss notification");
            }
        }
        if self.running {
            tracing::info!("session torn down");
        }
        self.running = false;
    }

    fn schedule_restart(&mut self, delay: Duration, reason: &'static str) {
        match self.restarts.schedule_restart(delay) {
            Ok(()) => tracing::info!(reason, delay_ms = delay.as_millis() as u64, "restart arranged"),
            Err(err) => tracing::error!(reason, error = %err, "failed to arrange restart"),
        }
    }
}

fn take_record<T>(
    ok: &mut bool,
    record: &'static str,
    result: Result<T, keepalive_core::StoreError>,
    fallback: T,
) -> T {
    result.unwrap_or_else(|err| {
        tracing::warn!(record, error = %err, "failed to load configuration record");
        *ok = false;
        fallback
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────

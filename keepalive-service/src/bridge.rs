//! Callback bridge: owns the application execution context and its channel.
//!
//! The bridge is driven from the reconciler's owner task only. Requests that
//! expect a reply (`onStart`, `onDestroy`) resolve to an [`InvokeOutcome`];
//! fire-and-forget messages (`onRepeatEvent`, relayed data) never wait.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keepalive_core::CallbackHandle;
use tokio::sync::oneshot;

use crate::error::ServiceError;
use crate::observer::{LifecycleNotice, ObserverRegistry};

pub const METHOD_START: &str = "onStart";
pub const METHOD_REPEAT_EVENT: &str = "onRepeatEvent";
pub const METHOD_DESTROY: &str = "onDestroy";
pub const METHOD_RECEIVE_DATA: &str = "onReceiveData";
pub const METHOD_BUTTON_PRESSED: &str = "onNotificationButtonPressed";
pub const METHOD_NOTIFICATION_PRESSED: &str = "onNotificationPressed";
pub const METHOD_NOTIFICATION_DISMISSED: &str = "onNotificationDismissed";

/// What the application answered to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodReply {
    Success,
    Error { code: String, message: Option<String> },
    NotImplemented,
}

pub type ReplyReceiver = oneshot::Receiver<MethodReply>;

/// A live execution context with its bidirectional message channel.
pub trait EngineContext: Send {
    /// Send `method` and hand back the receiver its reply will arrive on.
    fn invoke(&mut self, method: &str, data: Option<String>) -> Result<ReplyReceiver, ServiceError>;

    /// Send `method` without expecting a reply.
    fn notify(&mut self, method: &str, data: Option<String>) -> Result<(), ServiceError>;

    /// Stop processing inbound traffic. Pending replies resolve as closed.
    fn detach(&mut self);

    /// Release the context. Called once, after `detach`.
    fn dispose(self: Box<Self>);
}

/// Creates execution contexts bound to a callback handle.
pub trait Engine: Send + Sync {
    fn create(&self, handle: CallbackHandle) -> Result<Box<dyn EngineContext>, ServiceError>;
}

/// Resolution of a request sent to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeOutcome {
    Success,
    AppError { code: String, message: Option<String> },
    NotImplemented,
    /// No context exists; the request was never sent.
    NotInitialized,
    TimedOut,
    /// The channel went away before a reply arrived.
    ChannelClosed,
}

impl InvokeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvokeOutcome::Success)
    }
}

impl From<MethodReply> for InvokeOutcome {
    fn from(reply: MethodReply) -> Self {
        match reply {
            MethodReply::Success => InvokeOutcome::Success,
            MethodReply::Error { code, message } => InvokeOutcome::AppError { code, message },
            MethodReply::NotImplemented => InvokeOutcome::NotImplemented,
        }
    }
}

impl fmt::Display for InvokeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeOutcome::Success => f.write_str("success"),
            InvokeOutcome::AppError { code, message: Some(message) } => {
                write!(f, "application error {code}: {message}")
            }
            InvokeOutcome::AppError { code, message: None } => write!(f, "application error {code}"),
            InvokeOutcome::NotImplemented => f.write_str("not implemented"),
            InvokeOutcome::NotInitialized => f.write_str("not initialized"),
            InvokeOutcome::TimedOut => f.write_str("timed out"),
            InvokeOutcome::ChannelClosed => f.write_str("channel closed"),
        }
    }
}

pub struct CallbackBridge {
    engine: Arc<dyn Engine>,
    observers: ObserverRegistry,
    timeout: Duration,
    context: Option<Box<dyn EngineContext>>,
    handle: Option<CallbackHandle>,
}

impl CallbackBridge {
    pub fn new(engine: Arc<dyn Engine>, observers: ObserverRegistry, timeout: Duration) -> Self {
        Self {
            engine,
            observers,
            timeout,
            context: None,
            handle: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.context.is_some()
    }

    /// Handle the live context was created for.
    pub fn handle(&self) -> Option<CallbackHandle> {
        self.handle
    }

    /// Create a context for `handle`, destroying any existing one first.
    pub fn create_context(&mut self, handle: CallbackHandle) -> Result<(), ServiceError> {
        if self.context.is_some() {
            tracing::warn!(%handle, "context already live; destroying it before re-creating");
            self.destroy_context();
        }
        let context = self.engine.create(handle)?;
        self.context = Some(context);
        self.handle = Some(handle);
        tracing::info!(%handle, "execution context created");
        self.observers.notify(LifecycleNotice::ContextCreated);
        Ok(())
    }

    /// Detach the channel and dispose of the context. Idempotent.
    pub fn destroy_context(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        context.detach();
        self.observers.notify(LifecycleNotice::ContextWillDestroy);
        context.dispose();
        tracing::info!(handle = ?self.handle.take(), "execution context destroyed");
    }

    pub async fn invoke_start(&mut self) -> InvokeOutcome {
        self.request(METHOD_START, LifecycleNotice::TaskStarted).await
    }

    pub async fn invoke_destroy(&mut self) -> InvokeOutcome {
        self.request(METHOD_DESTROY, LifecycleNotice::TaskDestroyed).await
    }

    /// Deliver one repeat event. Without a context this is a no-op.
    pub fn invoke_repeat_event(&mut self) -> Result<(), ServiceError> {
        if let Some(context) = self.context.as_mut() {
            context.notify(METHOD_REPEAT_EVENT, None)?;
        } else {
            tracing::debug!("repeat event dropped; no execution context");
        }
        self.observers.notify(LifecycleNotice::RepeatEvent);
        Ok(())
    }

    /// Forward `method` with `data` to the application. Without a context
    /// this is a no-op.
    pub fn relay(&mut self, method: &str, data: Option<String>) -> Result<(), ServiceError> {
        match self.context.as_mut() {
            Some(context) => context.notify(method, data),
            None => {
                tracing::debug!(method, "relay dropped; no execution context");
                Ok(())
            }
        }
    }

    async fn request(&mut self, method: &'static str, notice: LifecycleNotice) -> InvokeOutcome {
        let Some(context) = self.context.as_mut() else {
            return InvokeOutcome::NotInitialized;
        };
        let reply = match context.invoke(method, None) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(method, error = %err, "request could not be sent");
                return InvokeOutcome::ChannelClosed;
            }
        };
        self.observers.notify(notice);

        let outcome = match tokio::time::timeout(self.timeout, reply).await {
            Ok(Ok(reply)) => InvokeOutcome::from(reply),
            Ok(Err(_)) => InvokeOutcome::ChannelClosed,
            Err(_) => InvokeOutcome::TimedOut,
        };
        if outcome.is_success() {
            tracing::debug!(method, "request succeeded");
        } else {
            tracing::warn!(method, %outcome, "request did not succeed");
        }
        outcome
    }
}

impl Drop for CallbackBridge {
    fn drop(&mut self) {
        self.destroy_context();
    }
}

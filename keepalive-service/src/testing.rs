//! In-memory collaborators for unit tests. Every fake appends to a shared
//! event log so tests can assert on cross-collaborator ordering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keepalive_core::CallbackHandle;
use tokio::sync::oneshot;

use crate::bridge::{Engine, EngineContext, MethodReply, ReplyReceiver};
use crate::error::ServiceError;
use crate::notification::{NotificationHandle, NotificationPresenter, PresentationRequest};
use crate::restart::RestartArranger;

#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == entry)
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Answer(MethodReply),
    /// Never answer; the sender is parked until the engine is dropped.
    Hang,
    /// Drop the sender so the receiver sees a closed channel.
    Drop,
}

#[derive(Default)]
struct EngineState {
    replies: HashMap<String, Reply>,
    parked: Vec<oneshot::Sender<MethodReply>>,
    fail_create: bool,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    log: EventLog,
    state: Arc<Mutex<EngineState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            state: Arc::default(),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.entries()
    }

    pub fn reply(&self, method: &str, reply: Reply) {
        self.state.lock().unwrap().replies.insert(method.to_string(), reply);
    }

    pub fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }
}

impl Engine for FakeEngine {
    fn create(&self, handle: CallbackHandle) -> Result<Box<dyn EngineContext>, ServiceError> {
        if self.state.lock().unwrap().fail_create {
            return Err(ServiceError::Bridge(format!("no entry point for {handle}")));
        }
        self.log.push(format!("create:{handle}"));
        Ok(Box::new(FakeContext {
            log: self.log.clone(),
            state: self.state.clone(),
        }))
    }
}

struct FakeContext {
    log: EventLog,
    state: Arc<Mutex<EngineState>>,
}

impl EngineContext for FakeContext {
    fn invoke(&mut self, method: &str, _data: Option<String>) -> Result<ReplyReceiver, ServiceError> {
        self.log.push(format!("invoke:{method}"));
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap();
        let reply = state
            .replies
            .get(method)
            .cloned()
            .unwrap_or(Reply::Answer(MethodReply::Success));
        match reply {
            Reply::Answer(answer) => {
                let _ = tx.send(answer);
            }
            Reply::Hang => state.parked.push(tx),
            Reply::Drop => drop(tx),
        }
        Ok(rx)
    }

    fn notify(&mut self, method: &str, data: Option<String>) -> Result<(), ServiceError> {
        match data {
            Some(data) => self.log.push(format!("notify:{method}:{data}")),
            None => self.log.push(format!("notify:{method}")),
        }
        Ok(())
    }

    fn detach(&mut self) {
        self.log.push("detach");
    }

    fn dispose(self: Box<Self>) {
        self.log.push("dispose");
    }
}

#[derive(Clone, Default)]
pub struct FakePresenter {
    log: EventLog,
    requests: Arc<Mutex<Vec<PresentationRequest>>>,
}

impl FakePresenter {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<PresentationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl NotificationPresenter for FakePresenter {
    fn present(&mut self, request: &PresentationRequest) -> Result<NotificationHandle, ServiceError> {
        self.log.push(format!("present:{}", request.title));
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        Ok(NotificationHandle {
            service_id: request.service_id,
            revision: requests.len() as u64,
        })
    }

    fn dismiss(&mut self) -> Result<(), ServiceError> {
        self.log.push("dismiss");
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeRestarts {
    log: EventLog,
}

impl FakeRestarts {
    pub fn with_log(log: EventLog) -> Self {
        Self { log }
    }
}

impl RestartArranger for FakeRestarts {
    fn schedule_restart(&mut self, delay: Duration) -> Result<(), ServiceError> {
        self.log.push(format!("restart:{}ms", delay.as_millis()));
        Ok(())
    }

    fn cancel_scheduled_restart(&mut self) -> Result<(), ServiceError> {
        self.log.push("cancel-restart");
        Ok(())
    }
}

/// One set of fakes sharing an event log.
#[derive(Clone, Default)]
pub struct Fakes {
    pub log: EventLog,
    pub engine: FakeEngine,
    pub presenter: FakePresenter,
    pub locks: crate::resources::InProcessLocks,
}

impl Fakes {
    pub fn new() -> Self {
        let log = EventLog::default();
        Self {
            engine: FakeEngine::with_log(log.clone()),
            presenter: FakePresenter::with_log(log.clone()),
            locks: crate::resources::InProcessLocks::new(),
            log,
        }
    }

    pub fn collaborators(
        &self,
        store: Arc<dyn keepalive_core::ConfigStore>,
    ) -> crate::reconciler::Collaborators {
        crate::reconciler::Collaborators {
            store,
            presenter: Box::new(self.presenter.clone()),
            restarts: Box::new(FakeRestarts::with_log(self.log.clone())),
            locks: Arc::new(self.locks.clone()),
            engine: Arc::new(self.engine.clone()),
            observers: crate::observer::ObserverRegistry::new(),
        }
    }
}

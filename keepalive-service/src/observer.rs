//! Lifecycle listeners for diagnostics and extensions.
//!
//! Listeners are notified synchronously, in registration order. They observe
//! the bridge; they never steer it.

use std::sync::{Arc, Mutex, OnceLock};

/// Every method has an empty default so listeners implement only what they need.
pub trait LifecycleListener: Send + Sync {
    fn on_context_create(&self) {}
    fn on_context_will_destroy(&self) {}
    fn on_task_start(&self) {}
    fn on_task_destroy(&self) {}
    fn on_task_repeat_event(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleNotice {
    ContextCreated,
    ContextWillDestroy,
    TaskStarted,
    TaskDestroyed,
    RepeatEvent,
}

#[derive(Clone, Default)]
pub struct ObserverRegistry {
    listeners: Arc<Mutex<Vec<Arc<dyn LifecycleListener>>>>,
}

static GLOBAL: OnceLock<ObserverRegistry> = OnceLock::new();

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by the service runtime.
    pub fn global() -> &'static ObserverRegistry {
        GLOBAL.get_or_init(ObserverRegistry::new)
    }

    /// Register `listener` unless the same instance is already registered.
    pub fn add(&self, listener: Arc<dyn LifecycleListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if !listeners.iter().any(|existing| same_listener(existing, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove(&self, listener: &Arc<dyn LifecycleListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|existing| !same_listener(existing, listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, notice: LifecycleNotice) {
        // Snapshot so a listener may add/remove listeners without deadlocking.
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            match notice {
                LifecycleNotice::ContextCreated => listener.on_context_create(),
                LifecycleNotice::ContextWillDestroy => listener.on_context_will_destroy(),
                LifecycleNotice::TaskStarted => listener.on_task_start(),
                LifecycleNotice::TaskDestroyed => listener.on_task_destroy(),
                LifecycleNotice::RepeatEvent => listener.on_task_repeat_event(),
            }
        }
    }
}

fn same_listener(a: &Arc<dyn LifecycleListener>, b: &Arc<dyn LifecycleListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl LifecycleListener for Recorder {
        fn on_context_create(&self) {
            self.log.lock().unwrap().push(format!("{}:create", self.name));
        }

        fn on_task_repeat_event(&self) {
            self.log.lock().unwrap().push(format!("{}:repeat", self.name));
        }
    }

    #[test]
    fn listeners_are_notified_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        registry.add(Arc::new(Recorder { name: "b", log: log.clone() }));
        registry.add(Arc::new(Recorder { name: "a", log: log.clone() }));

        registry.notify(LifecycleNotice::ContextCreated);
        registry.notify(LifecycleNotice::TaskStarted);
        registry.notify(LifecycleNotice::RepeatEvent);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["b:create", "a:create", "b:repeat", "a:repeat"]
        );
    }

    #[test]
    fn the_same_instance_registers_once_and_can_be_removed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        let listener: Arc<dyn LifecycleListener> = Arc::new(Recorder { name: "x", log: log.clone() });

        registry.add(listener.clone());
        registry.add(listener.clone());
        assert_eq!(registry.len(), 1);

        registry.remove(&listener);
        assert!(registry.is_empty());
        registry.notify(LifecycleNotice::ContextCreated);
        assert!(log.lock().unwrap().is_empty());
    }
}

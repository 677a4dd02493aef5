//! Session resources: the wake / network lock pair held while a session runs.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use keepalive_core::TaskOptions;

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Wake,
    Network,
}

impl LockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LockKind::Wake => "wake",
            LockKind::Network => "network",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A held platform lock.
pub trait Lock: Send {
    fn is_held(&self) -> bool;
    fn release(&mut self);
}

/// Obtains platform locks. Implemented by the host.
pub trait LockProvider: Send + Sync {
    fn acquire(&self, kind: LockKind) -> Result<Box<dyn Lock>, ServiceError>;
}

/// Holds at most one lock of each kind.
pub struct SessionResources {
    provider: Arc<dyn LockProvider>,
    wake: Option<Box<dyn Lock>>,
    network: Option<Box<dyn Lock>>,
}

impl SessionResources {
    pub fn new(provider: Arc<dyn LockProvider>) -> Self {
        Self {
            provider,
            wake: None,
            network: None,
        }
    }

    /// Acquire each lock the options allow and that is not already held.
    /// A failed acquisition is logged and the session carries on without it.
    pub fn acquire(&mut self, options: &TaskOptions) {
        if options.allow_wake_lock {
            acquire_slot(&*self.provider, LockKind::Wake, &mut self.wake);
        }
        if options.allow_network_lock {
            acquire_slot(&*self.provider, LockKind::Network, &mut self.network);
        }
    }

    /// Release both locks if held. Idempotent.
    pub fn release(&mut self) {
        release_slot(LockKind::Wake, &mut self.wake);
        release_slot(LockKind::Network, &mut self.network);
    }

    pub fn holds(&self, kind: LockKind) -> bool {
        let slot = match kind {
            LockKind::Wake => &self.wake,
            LockKind::Network => &self.network,
        };
        slot.as_ref().map(|lock| lock.is_held()).unwrap_or(false)
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        self.release();
    }
}

fn acquire_slot(provider: &dyn LockProvider, kind: LockKind, slot: &mut Option<Box<dyn Lock>>) {
    if slot.as_ref().map(|lock| lock.is_held()).unwrap_or(false) {
        return;
    }
    match provider.acquire(kind) {
        Ok(lock) => {
            tracing::info!(lock = %kind, "lock acquired");
            *slot = Some(lock);
        }
        Err(err) => {
            tracing::warn!(lock = %kind, error = %err, "lock acquisition failed; continuing without it");
            *slot = None;
        }
    }
}

fn release_slot(kind: LockKind, slot: &mut Option<Box<dyn Lock>>) {
    if let Some(mut lock) = slot.take() {
        if lock.is_held() {
            lock.release();
            tracing::info!(lock = %kind, "lock released");
        }
    }
}

// ---------------------------------------------------------------------------
// In-process bookkeeping provider
// ---------------------------------------------------------------------------

/// Lock provider for hosts without a platform lock primitive: it only tracks
/// how many locks of each kind are outstanding.
#[derive(Debug, Default, Clone)]
pub struct InProcessLocks {
    wake: Arc<AtomicUsize>,
    network: Arc<AtomicUsize>,
}

impl InProcessLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self, kind: LockKind) -> usize {
        self.counter(kind).load(Ordering::SeqCst)
    }

    fn counter(&self, kind: LockKind) -> &Arc<AtomicUsize> {
        match kind {
            LockKind::Wake => &self.wake,
            LockKind::Network => &self.network,
        }
    }
}

struct CountedLock {
    held: AtomicBool,
    outstanding: Arc<AtomicUsize>,
}

impl Lock for CountedLock {
    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn release(&mut self) {
        if self.held.swap(false, Ordering::SeqCst) {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl LockProvider for InProcessLocks {
    fn acquire(&self, kind: LockKind) -> Result<Box<dyn Lock>, ServiceError> {
        let outstanding = self.counter(kind).clone();
        outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountedLock {
            held: AtomicBool::new(true),
            outstanding,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(wake: bool, network: bool) -> TaskOptions {
        TaskOptions {
            allow_wake_lock: wake,
            allow_network_lock: network,
            ..TaskOptions::default()
        }
    }

    struct RefusingProvider;

    impl LockProvider for RefusingProvider {
        fn acquire(&self, kind: LockKind) -> Result<Box<dyn Lock>, ServiceError> {
            Err(ServiceError::LockAcquisition {
                kind: kind.as_str(),
                reason: "permission denied".to_string(),
            })
        }
    }

    #[test]
    fn acquire_is_idempotent_while_held() {
        let locks = InProcessLocks::new();
        let mut resources = SessionResources::new(Arc::new(locks.clone()));

        resources.acquire(&options(true, true));
        resources.acquire(&options(true, true));

        assert_eq!(locks.outstanding(LockKind::Wake), 1);
        assert_eq!(locks.outstanding(LockKind::Network), 1);
        assert!(resources.holds(LockKind::Wake));
    }

    #[test]
    fn only_flagged_locks_are_acquired() {
        let locks = InProcessLocks::new();
        let mut resources = SessionResources::new(Arc::new(locks.clone()));

        resources.acquire(&options(false, true));

        assert!(!resources.holds(LockKind::Wake));
        assert!(resources.holds(LockKind::Network));
        assert_eq!(locks.outstanding(LockKind::Wake), 0);
    }

    #[test]
    fn release_then_acquire_drops_a_lock_the_new_options_disable() {
        let locks = InProcessLocks::new();
        let mut resources = SessionResources::new(Arc::new(locks.clone()));

        resources.acquire(&options(true, true));
        resources.release();
        resources.acquire(&options(true, false));

        assert_eq!(locks.outstanding(LockKind::Wake), 1);
        assert_eq!(locks.outstanding(LockKind::Network), 0);
    }

    #[test]
    fn release_is_idempotent() {
        let locks = InProcessLocks::new();
        let mut resources = SessionResources::new(Arc::new(locks.clone()));

        resources.release();
        resources.acquire(&options(true, false));
        resources.release();
        resources.release();

        assert_eq!(locks.outstanding(LockKind::Wake), 0);
        assert!(!resources.holds(LockKind::Wake));
    }

    #[test]
    fn acquisition_failure_leaves_the_slot_empty() {
        let mut resources = SessionResources::new(Arc::new(RefusingProvider));
        resources.acquire(&options(true, true));
        assert!(!resources.holds(LockKind::Wake));
        assert!(!resources.holds(LockKind::Network));
    }

    #[test]
    fn dropping_resources_releases_locks() {
        let locks = InProcessLocks::new();
        {
            let mut resources = SessionResources::new(Arc::new(locks.clone()));
            resources.acquire(&options(true, true));
        }
        assert_eq!(locks.outstanding(LockKind::Wake), 0);
        assert_eq!(locks.outstanding(LockKind::Network), 0);
    }
}

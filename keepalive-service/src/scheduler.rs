//! Single-timer repeat scheduler.
//!
//! At most one timer is armed per scheduler; `start` always cancels the
//! previous one first. Each timer is tagged with a generation so firings that
//! were already queued when the timer was replaced can be recognised as stale.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keepalive_core::{EventAction, EventType};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::ServiceError;

/// Lower bound for a repeat period; a zero interval would spin.
pub const MIN_REPEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Counts armed timers across every scheduler sharing it.
#[derive(Debug, Clone, Default)]
pub struct TimerGauge(Arc<AtomicUsize>);

impl TimerGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn armed(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn disarmed(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

#[derive(Debug, Default)]
pub struct RepeatScheduler {
    task: Option<JoinHandle<()>>,
    gauge: TimerGauge,
    generation: u64,
}

impl RepeatScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gauge(gauge: TimerGauge) -> Self {
        Self {
            task: None,
            gauge,
            generation: 0,
        }
    }

    /// Generation of the most recent `start` or `stop`; firings carry the
    /// generation of the timer that produced them.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a firing tagged `generation` still belongs to the live timer.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    pub fn gauge(&self) -> &TimerGauge {
        &self.gauge
    }

    /// Cancel any armed timer, then apply `action`.
    ///
    /// `Once` invokes `on_fire` before returning; `Repeat` arms a timer on the
    /// current tokio runtime whose first firing is one interval from now.
    /// `on_fire` receives the generation assigned to this start, which is also
    /// returned.
    pub fn start<F>(&mut self, action: EventAction, on_fire: F) -> u64
    where
        F: Fn(u64) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;

        match action.kind {
            EventType::Nothing => {}
            EventType::Once => fire("once", generation, &on_fire),
            EventType::Repeat => {
                let period = Duration::from_millis(action.interval_millis).max(MIN_REPEAT_INTERVAL);
                if action.interval_millis == 0 {
                    tracing::warn!(
                        period_ms = period.as_millis() as u64,
                        "repeat interval of 0ms clamped to minimum period",
                    );
                }
                self.gauge.armed();
                self.task = Some(tokio::spawn(async move {
                    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        interval.tick().await;
                        tracing::trace!(generation, "repeat timer fired");
                        fire("repeat", generation, &on_fire);
                    }
                }));
                tracing::debug!(generation, period_ms = period.as_millis() as u64, "repeat timer armed");
            }
        }
        self.generation
    }

    /// Cancel the armed timer, if any, and invalidate queued firings. Idempotent.
    pub fn stop(&mut self) {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.gauge.disarmed();
            tracing::debug!(generation = self.generation, "repeat timer cancelled");
        }
    }
}

impl Drop for RepeatScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Run one firing; neither an error nor a panic escapes.
fn fire<F>(mode: &'static str, generation: u64, on_fire: &F)
where
    F: Fn(u64) -> Result<(), ServiceError>,
{
    match std::panic::catch_unwind(AssertUnwindSafe(|| on_fire(generation))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::error!(mode, generation, error = %err, "repeat event callback failed")
        }
        Err(_) => tracing::error!(mode, generation, "repeat event callback panicked"),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

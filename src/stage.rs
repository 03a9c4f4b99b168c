//! Shared run-state for pipeline stages.
//!
//! Every stage loop owns a [`StageState`]: a single-flight run guard, a
//! pause gate, an in-flight handler count for draining on shutdown, and an
//! optional concurrency cap. Handlers are tracked with [`StageState::dispatch`],
//! whose guard releases the slot on drop even when the handler panics.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};

/// Sleep out an idle turn, returning early when shutdown is signalled.
pub async fn idle(shutdown: &mut watch::Receiver<bool>, duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.changed() => {}
    }
}

/// Run-state shared between a stage loop and its spawned handlers.
pub struct StageState {
    name: &'static str,
    running: AtomicBool,
    paused: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
    limiter: Option<Arc<Semaphore>>,
}

impl StageState {
    /// State for a stage with unbounded handler concurrency.
    pub fn new(name: &'static str) -> Arc<Self> {
        Self::with_limit(name, 0)
    }

    /// State for a stage running at most `limit` handlers at once.
    /// 0 = unbounded.
    pub fn with_limit(name: &'static str, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            limiter: (limit > 0).then(|| Arc::new(Semaphore::new(limit))),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Claim the run slot. Returns false when the stage already runs,
    /// in which case the caller must not start a second loop.
    pub fn try_begin_run(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the run slot when the loop exits.
    pub fn end_run(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop dispatching new work; in-flight handlers keep running.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Reserve a handler slot, waiting on the concurrency cap when one is
    /// configured. Acquire the guard before spawning so the cap also bounds
    /// queued spawns.
    pub async fn dispatch(self: &Arc<Self>) -> DispatchGuard {
        let permit = match &self.limiter {
            Some(semaphore) => {
                // The limiter is never closed while the stage lives.
                Arc::clone(semaphore).acquire_owned().await.ok()
            }
            None => None,
        };
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        DispatchGuard {
            state: Arc::clone(self),
            _permit: permit,
        }
    }

    /// Wait for every in-flight handler to finish.
    pub async fn drain(&self) {
        loop {
            let drained = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }
}

/// Releases one handler slot on drop.
pub struct DispatchGuard {
    state: Arc<StageState>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if self.state.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.drained.notify_waiters();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

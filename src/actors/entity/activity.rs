use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

// ============================================================================
// Entity Activity - In-flight accounting for one live entity
// ============================================================================
//
// A command is in flight from the moment the directory checks it out until
// the actor has finished handling it, including restart backoff and retries.
// The InFlight guard travels inside the Deliver message, so a caller that
// gives up (timeout, dropped future) does not end the command's activity.
//
// Retiring is the passivation side: it only succeeds with nothing in flight,
// and once retired no new command can enter.
//
// ============================================================================

#[derive(Debug)]
struct ActivityState {
    in_flight: usize,
    last_active: Instant,
    retired: bool,
}

#[derive(Debug)]
pub struct Activity {
    state: Mutex<ActivityState>,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            state: Mutex::new(ActivityState {
                in_flight: 0,
                last_active: Instant::now(),
                retired: false,
            }),
        }
    }
}

impl Activity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark a command in flight. `None` once the entity has been retired.
    pub fn enter(self: &Arc<Self>) -> Option<InFlight> {
        let mut state = self.lock();
        if state.retired {
            return None;
        }
        state.in_flight += 1;
        Some(InFlight { activity: self.clone() })
    }

    /// Retire the entity if nothing is in flight. Returns whether it was retired.
    pub fn retire_if_idle(&self) -> bool {
        let mut state = self.lock();
        if state.in_flight > 0 {
            return false;
        }
        state.retired = true;
        true
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn is_retired(&self) -> bool {
        self.lock().retired
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        let state = self.lock();
        if state.in_flight > 0 {
            return Duration::ZERO;
        }
        now.saturating_duration_since(state.last_active)
    }

    fn lock(&self) -> MutexGuard<'_, ActivityState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps one command in flight until dropped.
#[derive(Debug)]
pub struct InFlight {
    activity: Arc<Activity>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = self.activity.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.last_active = Instant::now();
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gust_plan::prelude::ThroughputTarget;
use parking_lot::Mutex;

/// Shared pacing state for constant-throughput transactions.
///
/// Every virtual user issuing a transaction with a throughput target asks the registry how long
/// to pause first. Callers reserve send slots in arrival order, so the aggregate rate across any
/// number of users converges on the target and no caller is starved.
///
/// Timers for different transaction ids are fully independent: the registry map lock is held
/// only long enough to clone the per-id handle, and each id's state has its own mutex.
#[derive(Debug, Default)]
pub struct ThroughputTimerRegistry {
    timers: Mutex<HashMap<String, Arc<Mutex<PacerState>>>>,
}

#[derive(Debug, Default)]
struct PacerState {
    /// The next unreserved send slot. `None` until the first acquisition.
    next_slot: Option<Instant>,
}

impl ThroughputTimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next send slot for `transaction` and returns how long the caller must wait
    /// before issuing the request.
    pub fn acquire(&self, transaction: &str, target: ThroughputTarget) -> Duration {
        self.acquire_at(transaction, target, Instant::now())
    }

    /// [`ThroughputTimerRegistry::acquire`] against an explicit clock, so pacing behaviour can
    /// be tested without sleeping.
    pub fn acquire_at(&self, transaction: &str, target: ThroughputTarget, now: Instant) -> Duration {
        if target.per_minute <= 0.0 {
            return Duration::ZERO;
        }
        let interval = Duration::from_secs_f64(60.0 / target.per_minute);

        let timer = {
            let mut timers = self.timers.lock();
            timers
                .entry(transaction.to_string())
                .or_default()
                .clone()
        };

        let mut state = timer.lock();
        match state.next_slot {
            // First caller, or the schedule has fallen behind the clock: send immediately and
            // anchor the schedule at now.
            None => {
                state.next_slot = Some(now + interval);
                Duration::ZERO
            }
            Some(slot) if slot <= now => {
                state.next_slot = Some(now + interval);
                Duration::ZERO
            }
            Some(slot) => {
                state.next_slot = Some(slot + interval);
                slot - now
            }
        }
    }
}

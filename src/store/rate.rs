use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;

use super::StoreResult;

struct RateState {
    window_start: Instant,
    spent: u32,
    last_request: Option<Instant>,
    /// Earliest instant the next request may be issued, set on explicit
    /// backpressure from the store.
    hold_until: Option<Instant>,
}

/// Process-local request budget for the external store.
///
/// The store enforces its own limits; this gate keeps one worker from
/// exhausting the shared budget. It enforces minimum inter-request spacing,
/// honors explicit backpressure with a short hold, and refuses requests
/// outright with a synthetic unavailable response when the local budget for
/// the current window is nearly spent.
pub struct RateGate {
    budget_per_hour: u32,
    critical_remaining: u32,
    min_interval: Duration,
    state: Mutex<RateState>,
}

impl RateGate {
    pub fn new(config: &StoreConfig) -> Self {
        let critical_remaining =
            (config.budget_per_hour as f64 * config.critical_budget_fraction).ceil() as u32;
        Self {
            budget_per_hour: config.budget_per_hour,
            critical_remaining,
            min_interval: Duration::from_millis(config.min_request_interval_ms),
            state: Mutex::new(RateState {
                window_start: Instant::now(),
                spent: 0,
                last_request: None,
                hold_until: None,
            }),
        }
    }

    /// Admit one request, sleeping as needed for spacing and holds.
    /// Returns a synthetic `Unavailable` when the window budget is
    /// critically low rather than spending the remainder.
    pub async fn admit(&self) -> StoreResult<()> {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();

                if now.duration_since(state.window_start) >= Duration::from_secs(3600) {
                    state.window_start = now;
                    state.spent = 0;
                }

                if let Some(until) = state.hold_until {
                    if now < until {
                        Some(until - now)
                    } else {
                        state.hold_until = None;
                        None
                    }
                } else if let Some(last) = state.last_request {
                    let elapsed = now.duration_since(last);
                    if elapsed < self.min_interval {
                        Some(self.min_interval - elapsed)
                    } else {
                        None
                    }
                } else {
                    None
                }
            };

            match wait {
                Some(d) => tokio::time::sleep(d).await,
                None => break,
            }
        }

        let mut state = self.state.lock();
        let remaining = self.budget_per_hour.saturating_sub(state.spent);
        if remaining <= self.critical_remaining {
            warn!(
                remaining,
                budget = self.budget_per_hour,
                "Rate budget critically low, refusing request"
            );
            return Err(StoreError::Unavailable(format!(
                "local rate budget critically low ({} of {} remaining)",
                remaining, self.budget_per_hour
            )));
        }

        state.spent += 1;
        state.last_request = Some(Instant::now());
        Ok(())
    }

    /// Record explicit backpressure from the store; the next request waits
    /// out the hold first.
    pub fn record_backpressure(&self, retry_after_secs: Option<u64>) {
        let hold = Duration::from_secs(retry_after_secs.unwrap_or(30));
        debug!(hold_secs = hold.as_secs(), "Store backpressure, holding requests");
        let mut state = self.state.lock();
        state.hold_until = Some(Instant::now() + hold);
    }

    pub fn remaining(&self) -> u32 {
        let state = self.state.lock();
        self.budget_per_hour.saturating_sub(state.spent)
    }
}

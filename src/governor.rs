use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::{sync::Notify, time::Instant};

use crate::config::GovernorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    RateLimited,
    Recovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdjustmentEvent {
    pub from: usize,
    pub to: usize,
    pub reason: AdjustmentReason,
    /// Milliseconds since the governor was created.
    pub at_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GovernorSnapshot {
    pub current_limit: usize,
    pub min_limit: usize,
    pub max_limit: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub consecutive_rate_limit_errors: u32,
    pub total_acquired: u64,
    pub total_rate_limit_errors: u64,
    pub total_successes: u64,
    pub last_adjustment_ms: u64,
    pub adjustments: Vec<AdjustmentEvent>,
}

struct GovernorState {
    current_limit: usize,
    in_flight: usize,
    peak_in_flight: usize,
    consecutive_rate_limit_errors: u32,
    burst: VecDeque<Instant>,
    last_rate_limit: Option<Instant>,
    last_adjustment: Instant,
    total_acquired: u64,
    total_rate_limit_errors: u64,
    total_successes: u64,
    adjustments: VecDeque<AdjustmentEvent>,
}

struct Shared {
    config: GovernorConfig,
    created_at: Instant,
    state: Mutex<GovernorState>,
    slot_freed: Notify,
}

/// Bounds in-flight provider calls and resizes the bound from rate-limit feedback.
///
/// Waiting happens only in [`ConcurrencyGovernor::acquire`]; the feedback methods
/// adjust state under a short lock and never sleep. Lowering the limit below the
/// current in-flight count does not revoke tickets; new acquirers simply wait
/// until enough tickets are returned.
#[derive(Clone)]
pub struct ConcurrencyGovernor {
    shared: Arc<Shared>,
}

/// Proof of one occupied slot. Dropping it frees the slot.
#[must_use = "dropping a ticket immediately frees its slot"]
pub struct Ticket {
    shared: Arc<Shared>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.shared.slot_freed.notify_one();
    }
}

impl ConcurrencyGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let min_limit = config.min_limit.max(1);
        let max_limit = config.max_limit.max(min_limit);
        let initial = config.initial_limit.clamp(min_limit, max_limit);
        let now = Instant::now();

        Self {
            shared: Arc::new(Shared {
                config: GovernorConfig {
                    min_limit,
                    max_limit,
                    initial_limit: initial,
                    ..config
                },
                created_at: now,
                state: Mutex::new(GovernorState {
                    current_limit: initial,
                    in_flight: 0,
                    peak_in_flight: 0,
                    consecutive_rate_limit_errors: 0,
                    burst: VecDeque::new(),
                    last_rate_limit: None,
                    last_adjustment: now,
                    total_acquired: 0,
                    total_rate_limit_errors: 0,
                    total_successes: 0,
                    adjustments: VecDeque::new(),
                }),
                slot_freed: Notify::new(),
            }),
        }
    }

    pub async fn acquire(&self) -> Ticket {
        loop {
            let notified = self.shared.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(ticket) = self.try_acquire() {
                return ticket;
            }

            notified.await;
        }
    }

    pub fn try_acquire(&self) -> Option<Ticket> {
        let mut state = self.shared.state.lock();
        if state.in_flight >= state.current_limit {
            return None;
        }
        state.in_flight += 1;
        state.total_acquired += 1;
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        Some(Ticket {
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn release(&self, ticket: Ticket) {
        drop(ticket);
    }

    pub fn current_limit(&self) -> usize {
        self.shared.state.lock().current_limit
    }

    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    pub fn record_rate_limit_error(&self) {
        let now = Instant::now();
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();

        state.total_rate_limit_errors += 1;
        state.consecutive_rate_limit_errors = state.consecutive_rate_limit_errors.saturating_add(1);
        state.last_rate_limit = Some(now);
        state.burst.push_back(now);
        prune_window(&mut state.burst, now, config.burst_window());

        if state.burst.len() < config.burst_threshold.max(1) {
            return;
        }

        let current = state.current_limit;
        let scaled = (current as f64 * config.decrease_factor).floor() as usize;
        let next = scaled
            .min(current.saturating_sub(1))
            .max(config.min_limit);
        state.burst.clear();

        if next < current {
            state.current_limit = next;
            state.last_adjustment = now;
            self.push_adjustment(&mut state, current, next, AdjustmentReason::RateLimited, now);
            tracing::warn!(
                target: "governor",
                from = current,
                to = next,
                in_flight = state.in_flight,
                consecutive_rate_limit_errors = state.consecutive_rate_limit_errors,
                reason = "rate_limited",
                "concurrency_limit_decreased"
            );
        } else {
            tracing::debug!(
                target: "governor",
                limit = current,
                min_limit = config.min_limit,
                "concurrency_limit_at_floor"
            );
        }
    }

    pub fn record_success(&self) {
        let now = Instant::now();
        let config = &self.shared.config;
        let raised = {
            let mut state = self.shared.state.lock();
            state.total_successes += 1;
            state.consecutive_rate_limit_errors = 0;

            let quiet = config.quiet_period();
            let quiet_since_adjustment = now.duration_since(state.last_adjustment) >= quiet;
            let quiet_since_rate_limit = state
                .last_rate_limit
                .is_none_or(|at| now.duration_since(at) >= quiet);
            let current = state.current_limit;

            if current >= config.max_limit || !quiet_since_adjustment || !quiet_since_rate_limit {
                false
            } else {
                let step = ((current as f64 * config.increase_factor).ceil() as usize).max(1);
                let next = (current + step).min(config.max_limit);
                state.current_limit = next;
                state.last_adjustment = now;
                self.push_adjustment(&mut state, current, next, AdjustmentReason::Recovered, now);
                tracing::info!(
                    target: "governor",
                    from = current,
                    to = next,
                    reason = "recovered",
                    "concurrency_limit_increased"
                );
                true
            }
        };

        if raised {
            self.shared.slot_freed.notify_waiters();
        }
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        let now = Instant::now();
        let state = self.shared.state.lock();
        GovernorSnapshot {
            current_limit: state.current_limit,
            min_limit: self.shared.config.min_limit,
            max_limit: self.shared.config.max_limit,
            in_flight: state.in_flight,
            peak_in_flight: state.peak_in_flight,
            consecutive_rate_limit_errors: state.consecutive_rate_limit_errors,
            total_acquired: state.total_acquired,
            total_rate_limit_errors: state.total_rate_limit_errors,
            total_successes: state.total_successes,
            last_adjustment_ms: self.millis_since_start(state.last_adjustment.min(now)),
            adjustments: state.adjustments.iter().copied().collect(),
        }
    }

    fn push_adjustment(
        &self,
        state: &mut GovernorState,
        from: usize,
        to: usize,
        reason: AdjustmentReason,
        now: Instant,
    ) {
        let capacity = self.shared.config.max_adjustment_history;
        if capacity == 0 {
            return;
        }
        while state.adjustments.len() >= capacity {
            state.adjustments.pop_front();
        }
        state.adjustments.push_back(AdjustmentEvent {
            from,
            to,
            reason,
            at_ms: self.millis_since_start(now),
        });
    }

    fn millis_since_start(&self, at: Instant) -> u64 {
        at.duration_since(self.shared.created_at).as_millis() as u64
    }
}

fn prune_window(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(front) = window.front() {
        if now.duration_since(*front) > span {
            window.pop_front();
        } else {
            break;
        }
    }
}

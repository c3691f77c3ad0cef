//! Multi-gateway scheduling with adaptive backoff and failover
//!
//! Every retrieval walks the pool's gateways in readiness order, one
//! attempt in flight at a time. Rate-limited or erroring gateways back
//! off exponentially, gateways with connection failures are marked
//! broken and probed on a slow schedule, and fast gateways are rewarded
//! with a shorter interval, so repeated retrievals converge onto the
//! healthiest endpoint.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::GatewayPoolConfig;
use crate::gateway::{FetchError, Gateway};

/// Per-gateway scheduling state, owned exclusively by its pool
#[derive(Debug, Clone)]
pub struct GatewayState {
    reachable: bool,
    next_request_time: Instant,
    backoff_time: Duration,
    start_backoff: Duration,
    max_backoff: Duration,
}

impl GatewayState {
    pub fn new(start_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            reachable: true,
            next_request_time: Instant::now(),
            backoff_time: Duration::ZERO,
            start_backoff,
            max_backoff,
        }
    }

    pub fn reachable(&self) -> bool {
        self.reachable
    }

    pub fn backoff_time(&self) -> Duration {
        self.backoff_time
    }

    pub fn next_request_time(&self) -> Instant {
        self.next_request_time
    }

    fn schedule_next(&mut self) {
        self.next_request_time = Instant::now() + self.backoff_time;
    }

    /// Exponential backoff after a rate limit, error status or timeout
    pub fn backoff(&mut self) {
        self.backoff_time = (self.backoff_time.max(self.start_backoff) * 2).min(self.max_backoff);
        self.reachable = true;
        self.schedule_next();
    }

    /// Reward a successful request that outpaced the current backoff
    pub fn speedup(&mut self, not_below: Duration) -> bool {
        let sped_up = self.backoff_time > not_below;
        if sped_up {
            self.backoff_time = self.backoff_time.mul_f64(0.9);
        }
        self.reachable = true;
        self.schedule_next();
        sped_up
    }

    /// Connection-level failure: jump straight to the maximum backoff
    pub fn broken(&mut self) {
        self.backoff_time = self.max_backoff;
        self.reachable = false;
        self.schedule_next();
    }

    /// Schedule a short probe window for an unreachable gateway
    pub fn trying_to_reach(&mut self) {
        self.next_request_time = Instant::now() + Duration::from_secs(1);
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    /// The object does not exist; trying other gateways would only
    /// paper over genuine absence.
    #[error("object not found")]
    NotFound,

    #[error("{0} is not supported")]
    Unsupported(String),

    /// Every gateway and every round failed with a retryable error
    #[error("all gateways exhausted")]
    Exhausted { last: Option<FetchError> },
}

struct PoolEntry<G> {
    state: Mutex<GatewayState>,
    client: G,
}

/// Ordered set of gateways with per-gateway backoff state
///
/// Attempts within one logical retrieval are strictly sequential; the
/// pool never races gateways against each other for a single object.
/// Concurrent retrievals share the gateway states.
pub struct GatewayPool<G> {
    entries: Vec<PoolEntry<G>>,
    max_backoff_rounds: usize,
    operation_timeout: Duration,
}

impl<G: Gateway> GatewayPool<G> {
    pub fn new(gateways: Vec<G>, config: &GatewayPoolConfig) -> Self {
        let entries = gateways
            .into_iter()
            .map(|client| PoolEntry {
                state: Mutex::new(GatewayState::new(config.start_backoff, config.max_backoff)),
                client,
            })
            .collect();
        Self {
            entries,
            max_backoff_rounds: config.max_backoff_rounds,
            operation_timeout: config.operation_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn state(&self, index: usize) -> MutexGuard<'_, GatewayState> {
        self.entries[index]
            .state
            .lock()
            .expect("gateway state lock poisoned")
    }

    /// Gateway indices in priority order: ready-now first, then
    /// soonest-ready
    fn priority_order(&self) -> Vec<usize> {
        let now = Instant::now();
        let mut order: Vec<(Instant, usize)> = (0..self.entries.len())
            .map(|i| (self.state(i).next_request_time().max(now), i))
            .collect();
        order.sort_by_key(|&(ready_at, _)| ready_at);
        order.into_iter().map(|(_, i)| i).collect()
    }

    /// Run one operation against the pool until it succeeds, fails
    /// terminally, or every gateway and round is exhausted
    pub async fn run<'a, T, F, Fut>(&'a self, op: F) -> Result<T, PoolError>
    where
        F: Fn(&'a G) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let deadline = Instant::now() + self.operation_timeout;
        let mut last_error = None;

        for _ in 0..self.max_backoff_rounds {
            for index in self.priority_order() {
                if Instant::now() >= deadline {
                    return Err(PoolError::Exhausted { last: last_error });
                }
                let entry = &self.entries[index];
                let not_before = {
                    let mut state = self.state(index);
                    let not_before = state.next_request_time();
                    if !state.reachable() {
                        state.trying_to_reach();
                    } else {
                        state.schedule_next();
                    }
                    not_before
                };
                let now = Instant::now();
                if not_before > now {
                    if not_before >= deadline {
                        // This gateway cannot come up within the deadline
                        continue;
                    }
                    sleep(not_before - now).await;
                }

                debug!(gateway = %entry.client.url(), "trying");
                let started = Instant::now();
                match op(&entry.client).await {
                    Ok(result) => {
                        if self.state(index).speedup(started.elapsed()) {
                            debug!(gateway = %entry.client.url(), "speedup");
                        }
                        return Ok(result);
                    }
                    // Early exit: the object does not exist anywhere
                    Err(FetchError::NotFound) => return Err(PoolError::NotFound),
                    Err(FetchError::Unsupported(what)) => {
                        return Err(PoolError::Unsupported(what));
                    }
                    Err(
                        e @ (FetchError::RateLimited { .. }
                        | FetchError::Status(_)
                        | FetchError::Timeout),
                    ) => {
                        self.state(index).backoff();
                        debug!(gateway = %entry.client.url(), error = %e, "backoff");
                        last_error = Some(e);
                        // Start the next round against re-sorted states
                        break;
                    }
                    Err(e @ FetchError::Connect(_)) => {
                        self.state(index).broken();
                        debug!(gateway = %entry.client.url(), error = %e, "broken");
                        last_error = Some(e);
                        // Keep trying the remaining gateways this round
                        continue;
                    }
                }
            }
        }
        Err(PoolError::Exhausted { last: last_error })
    }

    /// One line of scheduling state per gateway
    pub fn state_report(&self) -> String {
        let now = Instant::now();
        (0..self.entries.len())
            .map(|i| {
                let state = self.state(i);
                format!(
                    "{}: reachable={} backoff={:?} next_in={:?}",
                    self.entries[i].client.url(),
                    state.reachable(),
                    state.backoff_time(),
                    state.next_request_time().saturating_duration_since(now),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

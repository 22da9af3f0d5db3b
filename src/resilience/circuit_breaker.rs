//! Per-dependency circuit breakers.
//!
//! ```text
//! Closed   -> Open:     failure_count reaches threshold
//! Open     -> HalfOpen: cooldown elapsed since last failure, one trial admitted
//! HalfOpen -> Closed:   trial succeeds
//! HalfOpen -> Open:     trial fails, cooldown restarts
//! ```
//!
//! Short-circuited calls never reach the operation and never count as failures.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use dashmap::DashMap;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};
use serde::Serialize;
use tokio::time::Instant;

use crate::{
    config::Config,
    core::error::BreakerError,
    event::{BreakerMilestone, DependencyMilestone, EventBus, WorkflowEvent},
};

static BREAKER_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "conductor_breaker_calls_total",
        "Calls routed through a circuit breaker by result",
        &["dependency", "result"]
    )
    .unwrap()
});

static BREAKER_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "conductor_breaker_transitions_total",
        "Circuit breaker state transitions",
        &["dependency", "milestone"]
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerPolicy {
    /// Consecutive failures required to open the breaker
    pub threshold: u32,
    /// Minimum time the breaker stays open before a trial call
    pub timeout: Duration,
}

impl BreakerPolicy {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    /// A single trial call is in flight
    HalfOpen,
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub key: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub threshold: u32,
    pub timeout: Duration,
}

impl BreakerSnapshot {
    pub fn is_open(&self) -> bool {
        self.state != BreakerState::Closed
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

pub struct CircuitBreaker {
    key: String,
    policy: BreakerPolicy,
    inner: Mutex<BreakerInner>,
    events: Option<EventBus>,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, policy: BreakerPolicy) -> Self {
        Self {
            key: key.into(),
            policy,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
            events: None,
        }
    }

    /// Publish transitions as `DependencyMilestone` events
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> BreakerPolicy {
        self.policy
    }

    /// Run `operation` unless the breaker short-circuits it
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(admission) = self.admit() else {
            BREAKER_CALLS
                .with_label_values(&[self.key.as_str(), "short_circuit"])
                .inc();
            debug!("Circuit breaker for '{}' is open, call skipped", self.key);
            return Err(BreakerError::Open {
                key: self.key.clone(),
            });
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };
        let result = operation().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                BREAKER_CALLS.with_label_values(&[self.key.as_str(), "success"]).inc();
                self.on_success(admission);
                Ok(value)
            }
            Err(err) => {
                BREAKER_CALLS.with_label_values(&[self.key.as_str(), "failure"]).inc();
                self.on_failure(admission);
                Err(BreakerError::Inner(err))
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            key: self.key.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            threshold: self.policy.threshold,
            timeout: self.policy.timeout,
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().state != BreakerState::Closed
    }

    /// Whether a call made now would be short-circuited. An open breaker
    /// whose cooldown has elapsed is not rejecting: the next call is its trial.
    pub fn is_rejecting(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            BreakerState::Closed => false,
            BreakerState::HalfOpen => true,
            BreakerState::Open => !self.cooled_down(&inner),
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        info!("Circuit breaker for '{}' reset", self.key);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // state stays consistent across a panic, every update is a plain store
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cooled_down(&self, inner: &BreakerInner) -> bool {
        inner
            .last_failure_at
            .map_or(true, |at| at.elapsed() >= self.policy.timeout)
    }

    fn admit(&self) -> Option<Admission> {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            BreakerState::Closed => Some(Admission::Normal),
            BreakerState::HalfOpen => None,
            BreakerState::Open => {
                if !self.cooled_down(&inner) {
                    return None;
                }
                inner.state = BreakerState::HalfOpen;
                let failure_count = inner.failure_count;
                drop(inner);
                self.transition(BreakerMilestone::HalfOpened, failure_count);
                Some(Admission::Trial)
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();
        match (admission, inner.state) {
            (Admission::Trial, _) => {
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.last_failure_at = None;
                drop(inner);
                self.transition(BreakerMilestone::Closed, 0);
            }
            (Admission::Normal, BreakerState::Closed) => inner.failure_count = 0,
            // admitted before another call opened the breaker; too late to close it
            (Admission::Normal, _) => {}
        }
    }

    fn on_failure(&self, admission: Admission) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        let failure_count = inner.failure_count;

        let milestone = match (admission, inner.state) {
            (Admission::Trial, _) => {
                inner.state = BreakerState::Open;
                inner.last_failure_at = Some(Instant::now());
                Some(BreakerMilestone::Reopened)
            }
            (Admission::Normal, BreakerState::Closed)
                if failure_count >= self.policy.threshold =>
            {
                inner.state = BreakerState::Open;
                inner.last_failure_at = Some(Instant::now());
                Some(BreakerMilestone::Opened)
            }
            _ => None,
        };
        drop(inner);

        if let Some(milestone) = milestone {
            self.transition(milestone, failure_count);
        }
    }

    fn abandon_trial(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen {
            // keep the old failure time so the next caller may trial right away
            inner.state = BreakerState::Open;
            warn!("Trial call for '{}' was cancelled", self.key);
        }
    }

    fn transition(&self, milestone: BreakerMilestone, failure_count: u32) {
        let label = match milestone {
            BreakerMilestone::Opened => "opened",
            BreakerMilestone::HalfOpened => "half_opened",
            BreakerMilestone::Reopened => "reopened",
            BreakerMilestone::Closed => "closed",
        };
        BREAKER_TRANSITIONS
            .with_label_values(&[self.key.as_str(), label])
            .inc();

        match milestone {
            BreakerMilestone::Opened | BreakerMilestone::Reopened => warn!(
                "Circuit breaker for '{}' {label} after {failure_count} consecutive failures",
                self.key
            ),
            _ => info!("Circuit breaker for '{}' {label}", self.key),
        }

        if let Some(events) = &self.events {
            events.publish(WorkflowEvent::DependencyMilestone(DependencyMilestone {
                key: self.key.clone(),
                milestone,
                failure_count,
            }));
        }
    }
}

/// Returns the breaker to `Open` if a trial future is dropped mid-flight
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}

/// One independent breaker per dependency key, created on first use
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    policies: HashMap<String, BreakerPolicy>,
    default_policy: BreakerPolicy,
    events: Option<EventBus>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_policy: BreakerPolicy) -> Self {
        Self {
            breakers: DashMap::new(),
            policies: HashMap::new(),
            default_policy,
            events: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let default_policy = BreakerPolicy::new(
            config.default_breaker.threshold,
            config.default_breaker.cooldown(),
        );
        config
            .dependencies
            .iter()
            .fold(Self::new(default_policy), |registry, dependency| {
                registry.with_policy(
                    dependency.key.clone(),
                    BreakerPolicy::new(dependency.threshold, dependency.cooldown()),
                )
            })
    }

    pub fn with_policy(mut self, key: impl Into<String>, policy: BreakerPolicy) -> Self {
        self.policies.insert(key.into(), policy);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy_for(&self, key: &str) -> BreakerPolicy {
        self.policies
            .get(key)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Get the breaker for `key`, creating it with its configured policy
    pub fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            return existing.value().clone();
        }

        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                let mut breaker = CircuitBreaker::new(key, self.policy_for(key));
                if let Some(events) = &self.events {
                    breaker = breaker.with_events(events.clone());
                }
                debug!("Created circuit breaker for '{key}'");
                Arc::new(breaker)
            })
            .value()
            .clone()
    }

    pub async fn execute<T, E, F, Fut>(&self, key: &str, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker(key).execute(operation).await
    }

    /// Whether the breaker for `key` currently rejects or is trialling calls
    pub fn is_open(&self, key: &str) -> bool {
        self.breakers
            .get(key)
            .map_or(false, |breaker| breaker.is_open())
    }

    /// Whether a call to `key` made now would be short-circuited
    pub fn is_rejecting(&self, key: &str) -> bool {
        self.breakers
            .get(key)
            .map_or(false, |breaker| breaker.is_rejecting())
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }
}

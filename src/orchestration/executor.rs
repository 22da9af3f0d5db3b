//! Concurrent fan-out execution
//!
//! This module runs independent dependency calls side by side, each behind
//! its own circuit breaker and deadline, and collects every outcome as a
//! value once all of them have finished.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use futures::{future::BoxFuture, future::join_all};
use log::{debug, warn};
use serde_json::Value;

use super::result::DependencyOutcome;
use crate::{
    config::Config,
    core::{DependencyError, DependencyResult},
    resilience::CircuitBreakerRegistry,
};

type Operation<'a> = Box<dyn FnOnce() -> BoxFuture<'a, DependencyResult<Value>> + Send + 'a>;

/// A deferred call; the operation only runs if the breaker admits it
pub struct FanOutCall<'a> {
    key: String,
    operation: Operation<'a>,
}

impl<'a> FanOutCall<'a> {
    pub fn new<F>(key: impl Into<String>, operation: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'a, DependencyResult<Value>> + Send + 'a,
    {
        Self {
            key: key.into(),
            operation: Box::new(operation),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Runs fan-out calls concurrently and never fails
pub struct FanOutExecutor {
    breakers: Arc<CircuitBreakerRegistry>,
    default_timeout: Duration,
    timeouts: HashMap<String, Duration>,
}

impl FanOutExecutor {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>, default_timeout: Duration) -> Self {
        Self {
            breakers,
            default_timeout,
            timeouts: HashMap::new(),
        }
    }

    pub fn from_config(breakers: Arc<CircuitBreakerRegistry>, config: &Config) -> Self {
        let timeouts = config
            .dependencies
            .iter()
            .map(|d| (d.key.clone(), config.call_timeout_for(&d.key)))
            .collect();

        Self {
            breakers,
            default_timeout: config.orchestrator.call_timeout(),
            timeouts,
        }
    }

    pub fn with_timeout(mut self, key: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(key.into(), timeout);
        self
    }

    /// Per-call deadline for a dependency key
    pub fn deadline_for(&self, key: &str) -> Duration {
        self.timeouts
            .get(key)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Run every call and return one outcome per key once all have completed
    pub async fn execute(&self, calls: Vec<FanOutCall<'_>>) -> BTreeMap<String, DependencyOutcome> {
        let pending = calls.into_iter().map(|call| {
            let breaker = self.breakers.breaker(&call.key);
            let deadline = self.deadline_for(&call.key);

            async move {
                let FanOutCall { key, operation } = call;
                let result = breaker
                    .execute(|| async move {
                        match tokio::time::timeout(deadline, operation()).await {
                            Ok(result) => result,
                            Err(_) => Err(DependencyError::Timeout(deadline)),
                        }
                    })
                    .await;

                let outcome = DependencyOutcome::from(result);
                match outcome.failure() {
                    Some(reason) => warn!("Dependency '{key}' failed: {reason}"),
                    None => debug!("Dependency '{key}' succeeded"),
                }
                (key, outcome)
            }
        });

        join_all(pending).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        orchestration::result::FailureReason,
        resilience::{BreakerPolicy, BreakerState},
    };
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn executor() -> FanOutExecutor {
        let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerPolicy::new(
            2,
            Duration::from_secs(60),
        )));
        FanOutExecutor::new(breakers, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let executor = executor();
        let calls = vec![
            FanOutCall::new("a", || async { Ok(json!("a-ok")) }.boxed()),
            FanOutCall::new("b", || {
                async { Err(DependencyError::failed("b exploded")) }.boxed()
            }),
            FanOutCall::new("c", || async { Ok(json!("c-ok")) }.boxed()),
        ];

        let outcomes = executor.execute(calls).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes["a"], DependencyOutcome::Success(json!("a-ok")));
        assert_eq!(
            outcomes["b"],
            DependencyOutcome::Failed(FailureReason::Error("b exploded".to_string()))
        );
        assert_eq!(outcomes["c"], DependencyOutcome::Success(json!("c-ok")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_run_concurrently() {
        let executor = executor();
        let started = tokio::time::Instant::now();
        let calls = ["a", "b", "c"]
            .into_iter()
            .map(|key| {
                FanOutCall::new(key, || {
                    async {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        Ok(json!(true))
                    }
                    .boxed()
                })
            })
            .collect();

        let outcomes = executor.execute(calls).await;
        assert!(outcomes.values().all(DependencyOutcome::is_success));
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_counts_as_breaker_failure() {
        let executor = executor().with_timeout("slow", Duration::from_millis(50));
        assert_eq!(executor.deadline_for("slow"), Duration::from_millis(50));
        assert_eq!(executor.deadline_for("other"), Duration::from_secs(1));

        for _ in 0..2 {
            let outcomes = executor
                .execute(vec![FanOutCall::new("slow", || {
                    futures::future::pending().boxed()
                })])
                .await;
            assert_eq!(
                outcomes["slow"],
                DependencyOutcome::Failed(FailureReason::TimedOut(Duration::from_millis(50)))
            );
        }

        let snapshot = executor.breakers.breaker("slow").snapshot();
        assert_eq!(snapshot.state, BreakerState::Open);
        assert_eq!(snapshot.failure_count, 2);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_operation() {
        let executor = executor();
        let invoked = AtomicUsize::new(0);

        for _ in 0..3 {
            let invoked = &invoked;
            executor
                .execute(vec![FanOutCall::new("flaky", move || {
                    async move {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        Err(DependencyError::failed("nope"))
                    }
                    .boxed()
                })])
                .await;
        }

        assert_eq!(invoked.load(Ordering::SeqCst), 2);
        let outcomes = executor
            .execute(vec![FanOutCall::new("flaky", || async { Ok(json!(1)) }.boxed())])
            .await;
        assert_eq!(outcomes["flaky"], DependencyOutcome::Failed(FailureReason::CircuitOpen));
    }

    #[tokio::test]
    async fn test_empty_fan_out() {
        assert!(executor().execute(Vec::new()).await.is_empty());
    }
}

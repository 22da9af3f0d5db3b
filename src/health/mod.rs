//! Dependency health aggregation
//!
//! The monitor polls every tracked dependency, maps the answers to a
//! [`ServiceHealth`] map and swaps it in as a whole. Readers always see a
//! complete snapshot; the orchestrator's readiness check reads that snapshot
//! together with breaker state instead of polling on every call.

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use arc_swap::ArcSwap;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    core::SecondaryDependency,
    resilience::{BreakerSnapshot, CircuitBreakerRegistry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Overall status derived from the health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemStatus {
    Healthy,
    Degraded,
    Critical,
}

impl SystemStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            SystemStatus::Healthy
        } else if score >= 50.0 {
            SystemStatus::Degraded
        } else {
            SystemStatus::Critical
        }
    }
}

/// `100 * healthy / total`; an empty system is fully healthy
pub fn health_score(healthy: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    100.0 * healthy as f64 / total as f64
}

/// Health of every tracked dependency, keyed by dependency key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceHealth(BTreeMap<String, HealthStatus>);

impl ServiceHealth {
    pub fn new(entries: BTreeMap<String, HealthStatus>) -> Self {
        Self(entries)
    }

    pub fn get(&self, key: &str) -> Option<HealthStatus> {
        self.0.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, HealthStatus)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.0
            .values()
            .filter(|status| **status == HealthStatus::Healthy)
            .count()
    }

    pub fn score(&self) -> f64 {
        health_score(self.healthy_count(), self.len())
    }
}

impl FromIterator<(String, HealthStatus)> for ServiceHealth {
    fn from_iter<I: IntoIterator<Item = (String, HealthStatus)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub services: ServiceHealth,
    pub score: f64,
    pub status: SystemStatus,
    pub breakers: Vec<BreakerSnapshot>,
    pub checked_at: SystemTime,
}

pub struct HealthMonitor {
    dependencies: Vec<Arc<dyn SecondaryDependency>>,
    breakers: Arc<CircuitBreakerRegistry>,
    check_timeout: Duration,
    snapshot: ArcSwap<ServiceHealth>,
}

impl HealthMonitor {
    pub fn new(
        dependencies: Vec<Arc<dyn SecondaryDependency>>,
        breakers: Arc<CircuitBreakerRegistry>,
        check_timeout: Duration,
    ) -> Self {
        let initial: ServiceHealth = dependencies
            .iter()
            .map(|d| (d.key().to_string(), HealthStatus::Unknown))
            .collect();

        Self {
            dependencies,
            breakers,
            check_timeout,
            snapshot: ArcSwap::from_pointee(initial),
        }
    }

    /// Poll every dependency and replace the stored snapshot
    pub async fn check_health(&self) -> HealthReport {
        let checks = self.dependencies.iter().map(|dependency| async move {
            let key = dependency.key().to_string();
            let status =
                match tokio::time::timeout(self.check_timeout, dependency.health()).await {
                    Ok(Ok(Some(status))) => status,
                    // no health contract is not a failure
                    Ok(Ok(None)) => HealthStatus::Healthy,
                    Ok(Err(e)) => {
                        warn!("Health query for '{key}' failed: {e}");
                        HealthStatus::Unhealthy
                    }
                    Err(_) => {
                        warn!(
                            "Health query for '{key}' timed out after {}ms",
                            self.check_timeout.as_millis()
                        );
                        HealthStatus::Unhealthy
                    }
                };
            (key, status)
        });

        let services: ServiceHealth = join_all(checks).await.into_iter().collect();
        let score = services.score();
        let status = SystemStatus::from_score(score);
        debug!("Health check completed: score={score:.1} status={status:?}");

        self.snapshot.store(Arc::new(services.clone()));

        HealthReport {
            services,
            score,
            status,
            breakers: self.breakers.snapshots(),
            checked_at: SystemTime::now(),
        }
    }

    /// Last computed map, without polling
    pub fn snapshot(&self) -> Arc<ServiceHealth> {
        self.snapshot.load_full()
    }

    /// `(healthy, total)` over tracked dependencies, counting a dependency
    /// only when its snapshot says healthy and its breaker would admit a call
    pub fn readiness_counts(&self) -> (usize, usize) {
        let snapshot = self.snapshot.load();
        let healthy = snapshot
            .iter()
            .filter(|(key, status)| {
                *status == HealthStatus::Healthy && !self.breakers.is_rejecting(key)
            })
            .count();
        (healthy, snapshot.len())
    }

    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("Starting health monitor, polling every {}s", interval.as_secs());
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health monitor received shutdown signal");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let report = self.check_health().await;
                    if report.status != SystemStatus::Healthy {
                        warn!("System health {:?} (score {:.1})", report.status, report.score);
                    }
                }
            }
        }

        info!("Health monitor stopped");
    }
}

//! Workflow orchestration
//!
//! One workflow invocation moves through a fixed pipeline:
//!
//! 1. readiness check against the pre-computed health view
//! 2. precondition validation
//! 3. the authoritative primary call
//! 4. concurrent fan-out to every participating secondary dependency
//! 5. aggregation, audit, notification, cache and event publication
//!
//! Only steps 1-3 can fail the invocation. Secondary failures degrade the
//! result instead, and sink failures are logged and ignored.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::FutureExt;
use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;
use validator::Validate;

use super::{
    executor::{FanOutCall, FanOutExecutor},
    result::OperationResult,
};
use crate::{
    config::Config,
    config_error,
    core::{
        AuditRecord, DependencyCall, Notification, OrchestratorError, OrchestratorResult,
        Readiness, ServiceContainer, WorkflowKind, WorkflowRequest,
    },
    event::{EventBus, FailedOperation, WorkflowEvent},
    health::HealthMonitor,
    metrics::MetricsAggregator,
    resilience::CircuitBreakerRegistry,
};

const AUDIT_MODULE: &str = "conductor";

pub struct Orchestrator {
    container: ServiceContainer,
    events: EventBus,
    breakers: Arc<CircuitBreakerRegistry>,
    executor: FanOutExecutor,
    health: Arc<HealthMonitor>,
    metrics: Arc<MetricsAggregator>,
    readiness: Readiness,
    dashboard_cache_ttl: Duration,
}

impl Orchestrator {
    pub fn new(config: &Config, container: ServiceContainer) -> OrchestratorResult<Self> {
        config
            .validate()
            .map_err(|e| config_error!("Invalid orchestrator config: {e}"))?;

        let events = EventBus::new(config.orchestrator.event_capacity);
        let breakers =
            Arc::new(CircuitBreakerRegistry::from_config(config).with_events(events.clone()));
        let executor = FanOutExecutor::from_config(breakers.clone(), config);
        let health = Arc::new(HealthMonitor::new(
            container.secondaries().to_vec(),
            breakers.clone(),
            config.orchestrator.call_timeout(),
        ));

        for key in container.secondary_keys() {
            if config.dependency(&key).is_none() {
                debug!("Dependency '{key}' has no config entry, using default breaker policy");
            }
        }

        Ok(Self {
            container,
            events,
            breakers,
            executor,
            health,
            metrics: Arc::new(MetricsAggregator::new()),
            readiness: Readiness::new(),
            dashboard_cache_ttl: config.orchestrator.dashboard_cache_ttl(),
        })
    }

    pub async fn enroll(
        &self,
        user_id: impl Into<String>,
        course_id: impl Into<String>,
    ) -> OrchestratorResult<OperationResult> {
        self.run(WorkflowRequest::enroll(user_id, course_id)).await
    }

    pub async fn record_completion(
        &self,
        user_id: impl Into<String>,
        course_id: impl Into<String>,
        score: Option<f64>,
    ) -> OrchestratorResult<OperationResult> {
        self.run(WorkflowRequest::record_completion(user_id, course_id, score))
            .await
    }

    pub async fn build_dashboard(
        &self,
        user_id: impl Into<String>,
    ) -> OrchestratorResult<OperationResult> {
        self.run(WorkflowRequest::build_dashboard(user_id)).await
    }

    /// Run one workflow; metrics are recorded exactly once on every path
    pub async fn run(&self, request: WorkflowRequest) -> OrchestratorResult<OperationResult> {
        let started = Instant::now();
        let workflow = request.workflow;

        let result = self.run_pipeline(&request, started).await;

        self.metrics
            .record_workflow(workflow, result.is_ok(), started.elapsed());
        result
    }

    /// Fails unless startup completed and at least half of the tracked
    /// dependencies are healthy with a breaker that would admit a call
    pub fn check_readiness(&self) -> OrchestratorResult<()> {
        if !self.readiness.is_ready() {
            return Err(OrchestratorError::SystemNotReady(
                "startup has not completed".to_string(),
            ));
        }

        let (healthy, total) = self.health.readiness_counts();
        if healthy * 2 < total {
            return Err(OrchestratorError::SystemNotReady(format!(
                "only {healthy} of {total} dependencies are healthy"
            )));
        }

        Ok(())
    }

    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    async fn run_pipeline(
        &self,
        request: &WorkflowRequest,
        started: Instant,
    ) -> OrchestratorResult<OperationResult> {
        let workflow = request.workflow;
        let operation_id = Uuid::new_v4();

        if let Err(e) = self.check_readiness() {
            warn!("Rejecting {workflow} for '{}': {e}", request.user_id);
            return Err(e);
        }

        if let Err(reason) = self.container.validator().validate(request).await {
            warn!("Validation failed for {workflow} ({operation_id}): {reason}");
            self.audit(AuditRecord::new(
                AUDIT_MODULE,
                format!("{workflow}.validation_failed"),
                json!({
                    "operation_id": operation_id,
                    "user_id": request.user_id,
                    "reason": reason,
                }),
            ))
            .await;
            return Err(OrchestratorError::Validation(reason));
        }

        let primary = match self.container.primary().execute(request).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Primary call failed for {workflow} ({operation_id}): {e}");
                self.audit(AuditRecord::new(
                    AUDIT_MODULE,
                    workflow.as_str(),
                    json!({
                        "operation_id": operation_id,
                        "user_id": request.user_id,
                        "success": false,
                        "error": e.to_string(),
                    }),
                ))
                .await;
                self.events
                    .publish(WorkflowEvent::OperationFailed(FailedOperation {
                        operation_id,
                        workflow,
                        user_id: request.user_id.clone(),
                        reason: e.to_string(),
                    }));
                return Err(OrchestratorError::PrimaryDependency(e));
            }
        };

        let call = DependencyCall::new(operation_id, request, primary.clone());
        let outcomes = {
            let call = &call;
            let calls = self
                .container
                .secondaries()
                .iter()
                .filter(|dependency| dependency.supports(workflow))
                .map(|dependency| {
                    FanOutCall::new(dependency.key(), move || {
                        async move { dependency.invoke(call).await }.boxed()
                    })
                })
                .collect();
            self.executor.execute(calls).await
        };

        let succeeded: BTreeMap<String, Value> = outcomes
            .iter()
            .filter_map(|(key, outcome)| outcome.value().map(|v| (key.clone(), v.clone())))
            .collect();
        let artifacts = self
            .container
            .artifacts()
            .build(workflow, &primary, &succeeded);

        let result = OperationResult::new(
            operation_id,
            workflow,
            request.user_id.clone(),
            primary,
            outcomes,
            artifacts,
            started.elapsed(),
        );

        if result.is_degraded() {
            warn!(
                "{workflow} ({operation_id}) completed degraded, failed: {:?}",
                result.failed_dependencies()
            );
        } else {
            info!("{workflow} ({operation_id}) completed");
        }

        self.audit(self.success_record(&result)).await;
        self.notify(&result).await;
        if workflow == WorkflowKind::BuildDashboard {
            self.cache_dashboard(&result).await;
        }
        self.events
            .publish(WorkflowEvent::OperationSucceeded(Arc::new(result.clone())));

        Ok(result)
    }

    fn success_record(&self, result: &OperationResult) -> AuditRecord {
        let dependencies: BTreeMap<&str, bool> = result
            .outcomes()
            .iter()
            .map(|(key, outcome)| (key.as_str(), outcome.is_success()))
            .collect();

        AuditRecord::new(
            AUDIT_MODULE,
            result.workflow().as_str(),
            json!({
                "operation_id": result.operation_id(),
                "user_id": result.user_id(),
                "success": true,
                "completion": result.completion(),
                "dependencies": dependencies,
                "failed_dependencies": result.failed_dependencies(),
                "processing_time_ms": result.processing_time().as_millis() as u64,
            }),
        )
    }

    async fn audit(&self, record: AuditRecord) {
        let action = record.action.clone();
        if let Err(e) = self.container.audit().create_record(record).await {
            warn!("Failed to write audit record '{action}': {e}");
        }
    }

    async fn notify(&self, result: &OperationResult) {
        let notification = Notification {
            user_id: result.user_id().to_string(),
            kind: format!("{}_completed", result.workflow()),
            data: json!({
                "operation_id": result.operation_id(),
                "completion": result.completion(),
            }),
        };
        if let Err(e) = self.container.notifier().send(notification).await {
            warn!(
                "Failed to notify '{}' about {}: {e}",
                result.user_id(),
                result.operation_id()
            );
        }
    }

    async fn cache_dashboard(&self, result: &OperationResult) {
        let Some(cache) = self.container.cache() else {
            return;
        };

        let key = format!("dashboard:{}", result.user_id());
        let value = match serde_json::to_value(result) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to encode dashboard for cache key '{key}': {e}");
                return;
            }
        };
        if let Err(e) = cache.set(&key, value, self.dashboard_cache_ttl).await {
            warn!("Failed to cache dashboard '{key}': {e}");
        }
    }
}

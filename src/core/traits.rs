//! Core traits for conductor collaborators
//!
//! This module defines the contracts the orchestrator consumes. Concrete
//! business subsystems, sinks and caches live outside this crate and are
//! plugged in through these traits.

use std::{collections::BTreeMap, time::Duration, time::SystemTime};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{
    context::{DependencyCall, WorkflowKind, WorkflowRequest},
    error::DependencyResult,
};
use crate::health::HealthStatus;

/// A secondary subsystem invoked during fan-out
#[async_trait]
pub trait SecondaryDependency: Send + Sync {
    /// Stable key selecting the breaker and health entry
    fn key(&self) -> &str;

    /// Called once at orchestrator startup
    async fn initialize(&self) -> DependencyResult<()> {
        Ok(())
    }

    /// Health query; `Ok(None)` means the dependency exposes no health contract
    async fn health(&self) -> DependencyResult<Option<HealthStatus>> {
        Ok(None)
    }

    /// Whether this dependency takes part in the given workflow
    fn supports(&self, _workflow: WorkflowKind) -> bool {
        true
    }

    /// Domain operation for the workflow carried by `call`
    async fn invoke(&self, call: &DependencyCall) -> DependencyResult<Value>;
}

/// The authoritative system of record for every workflow
#[async_trait]
pub trait PrimaryService: Send + Sync {
    async fn execute(&self, request: &WorkflowRequest) -> DependencyResult<Value>;
}

/// Domain-specific precondition checks run before any side effect
#[async_trait]
pub trait PreconditionValidator: Send + Sync {
    /// Returns the rejection reason on failure
    async fn validate(&self, request: &WorkflowRequest) -> Result<(), String>;
}

/// Append-only audit trail
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn create_record(&self, record: AuditRecord) -> DependencyResult<()>;
}

/// Outbound user notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: Notification) -> DependencyResult<()>;
}

/// Memoization of aggregated results for read-heavy workflows
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> DependencyResult<()>;
}

/// Derives secondary artifacts (predictions, achievement summaries, ...)
/// from the primary result and the dependencies that succeeded
pub trait ArtifactBuilder: Send + Sync {
    fn build(
        &self,
        workflow: WorkflowKind,
        primary: &Value,
        succeeded: &BTreeMap<String, Value>,
    ) -> Map<String, Value>;
}

/// One entry of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub module: String,
    pub action: String,
    pub data: Value,
    pub timestamp: SystemTime,
}

impl AuditRecord {
    pub fn new(module: impl Into<String>, action: impl Into<String>, data: Value) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            data,
            timestamp: SystemTime::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

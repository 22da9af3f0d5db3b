//! Outcomes of orchestrated workflows

use std::{
    collections::BTreeMap,
    fmt,
    time::{Duration, SystemTime},
};

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::{BreakerError, DependencyError, WorkflowKind};

/// Why a secondary call produced no value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Error(String),
    /// Short-circuited by the dependency's breaker
    CircuitOpen,
    /// Exceeded the per-call deadline
    TimedOut(Duration),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Error(msg) => write!(f, "{msg}"),
            FailureReason::CircuitOpen => write!(f, "circuit open"),
            FailureReason::TimedOut(after) => write!(f, "timed out after {}ms", after.as_millis()),
        }
    }
}

/// Result of one fan-out call, captured as a value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum DependencyOutcome {
    Success(Value),
    Failed(FailureReason),
}

impl DependencyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DependencyOutcome::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            DependencyOutcome::Success(value) => Some(value),
            DependencyOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            DependencyOutcome::Success(_) => None,
            DependencyOutcome::Failed(reason) => Some(reason),
        }
    }
}

impl From<Result<Value, BreakerError<DependencyError>>> for DependencyOutcome {
    fn from(result: Result<Value, BreakerError<DependencyError>>) -> Self {
        match result {
            Ok(value) => DependencyOutcome::Success(value),
            Err(BreakerError::Open { .. }) => DependencyOutcome::Failed(FailureReason::CircuitOpen),
            Err(BreakerError::Inner(DependencyError::Timeout(after))) => {
                DependencyOutcome::Failed(FailureReason::TimedOut(after))
            }
            Err(BreakerError::Inner(err)) => {
                DependencyOutcome::Failed(FailureReason::Error(err.to_string()))
            }
        }
    }
}

/// Whether every secondary dependency contributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Complete,
    /// The primary call succeeded but some secondary data is missing
    Degraded,
}

/// Combined result of one successful workflow invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    operation_id: Uuid,
    workflow: WorkflowKind,
    user_id: String,
    primary: Value,
    outcomes: BTreeMap<String, DependencyOutcome>,
    artifacts: Map<String, Value>,
    processing_time: Duration,
    completed_at: SystemTime,
}

impl OperationResult {
    pub(crate) fn new(
        operation_id: Uuid,
        workflow: WorkflowKind,
        user_id: String,
        primary: Value,
        outcomes: BTreeMap<String, DependencyOutcome>,
        artifacts: Map<String, Value>,
        processing_time: Duration,
    ) -> Self {
        Self {
            operation_id,
            workflow,
            user_id,
            primary,
            outcomes,
            artifacts,
            processing_time,
            completed_at: SystemTime::now(),
        }
    }

    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    pub fn workflow(&self) -> WorkflowKind {
        self.workflow
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn primary(&self) -> &Value {
        &self.primary
    }

    pub fn outcomes(&self) -> &BTreeMap<String, DependencyOutcome> {
        &self.outcomes
    }

    pub fn outcome(&self, key: &str) -> Option<&DependencyOutcome> {
        self.outcomes.get(key)
    }

    pub fn artifacts(&self) -> &Map<String, Value> {
        &self.artifacts
    }

    pub fn processing_time(&self) -> Duration {
        self.processing_time
    }

    pub fn completed_at(&self) -> SystemTime {
        self.completed_at
    }

    pub fn completion(&self) -> Completion {
        if self.outcomes.values().all(DependencyOutcome::is_success) {
            Completion::Complete
        } else {
            Completion::Degraded
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.completion() == Completion::Degraded
    }

    /// Keys of dependencies whose outcome is `Failed`, in key order
    pub fn failed_dependencies(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

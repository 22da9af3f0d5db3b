//! Workflow request context
//!
//! This module provides the request handed to the orchestrator and the
//! per-dependency call context derived from the primary result.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Named workflows the orchestrator drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Enroll,
    RecordCompletion,
    BuildDashboard,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Enroll => "enroll",
            WorkflowKind::RecordCompletion => "record_completion",
            WorkflowKind::BuildDashboard => "build_dashboard",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single workflow invocation as submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub workflow: WorkflowKind,
    pub user_id: String,
    #[serde(default)]
    pub payload: Value,
}

impl WorkflowRequest {
    pub fn new(workflow: WorkflowKind, user_id: impl Into<String>, payload: Value) -> Self {
        Self {
            workflow,
            user_id: user_id.into(),
            payload,
        }
    }

    pub fn enroll(user_id: impl Into<String>, course_id: impl Into<String>) -> Self {
        Self::new(
            WorkflowKind::Enroll,
            user_id,
            json!({ "course_id": course_id.into() }),
        )
    }

    pub fn record_completion(
        user_id: impl Into<String>,
        course_id: impl Into<String>,
        score: Option<f64>,
    ) -> Self {
        Self::new(
            WorkflowKind::RecordCompletion,
            user_id,
            json!({ "course_id": course_id.into(), "score": score }),
        )
    }

    pub fn build_dashboard(user_id: impl Into<String>) -> Self {
        Self::new(WorkflowKind::BuildDashboard, user_id, Value::Null)
    }

    /// Get a string field from the payload
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

/// Context carried by every secondary call of one invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyCall {
    pub operation_id: Uuid,
    pub workflow: WorkflowKind,
    pub user_id: String,
    pub payload: Value,
    /// Result returned by the primary service
    pub primary: Value,
}

impl DependencyCall {
    pub fn new(operation_id: Uuid, request: &WorkflowRequest, primary: Value) -> Self {
        Self {
            operation_id,
            workflow: request.workflow,
            user_id: request.user_id.clone(),
            payload: request.payload.clone(),
            primary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enroll_request() {
        let request = WorkflowRequest::enroll("u1", "c1");
        assert_eq!(request.workflow, WorkflowKind::Enroll);
        assert_eq!(request.user_id, "u1");
        assert_eq!(request.payload_str("course_id"), Some("c1"));
        assert_eq!(request.payload_str("missing"), None);
    }

    #[test]
    fn test_workflow_kind_names() {
        assert_eq!(WorkflowKind::RecordCompletion.to_string(), "record_completion");
        let kind: WorkflowKind = serde_json::from_value(json!("build_dashboard")).unwrap();
        assert_eq!(kind, WorkflowKind::BuildDashboard);
    }

    #[test]
    fn test_dependency_call_carries_primary() {
        let request = WorkflowRequest::record_completion("u2", "c9", Some(88.0));
        let id = Uuid::new_v4();
        let call = DependencyCall::new(id, &request, json!({ "enrollment_id": 7 }));
        assert_eq!(call.operation_id, id);
        assert_eq!(call.workflow, WorkflowKind::RecordCompletion);
        assert_eq!(call.primary["enrollment_id"], 7);
        assert_eq!(call.payload["score"], 88.0);
    }
}

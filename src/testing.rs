//! Hand-written collaborators shared by unit tests

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    core::{
        AuditRecord, AuditSink, DependencyCall, DependencyError, DependencyResult, Notification,
        NotificationSink, PrimaryService, SecondaryDependency, WorkflowKind, WorkflowRequest,
    },
    health::HealthStatus,
};

pub struct MockPrimary {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockPrimary {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        let primary = Self::new();
        primary.failing.store(true, Ordering::SeqCst);
        primary
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrimaryService for MockPrimary {
    async fn execute(&self, request: &WorkflowRequest) -> DependencyResult<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(DependencyError::failed("primary store offline"));
        }
        Ok(json!({
            "record_id": n,
            "workflow": request.workflow.as_str(),
            "user_id": request.user_id,
        }))
    }
}

#[derive(Clone, Copy)]
enum HealthMode {
    NoContract,
    Reports(HealthStatus),
    Fails,
    Hangs,
}

pub struct MockDependency {
    key: String,
    failing: AtomicBool,
    calls: AtomicUsize,
    initialized: AtomicBool,
    health: HealthMode,
    delay: Option<Duration>,
    only: Option<WorkflowKind>,
}

impl MockDependency {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            health: HealthMode::NoContract,
            delay: None,
            only: None,
        }
    }

    pub fn failing(key: &str) -> Self {
        let dependency = Self::new(key);
        dependency.set_failing(true);
        dependency
    }

    pub fn with_health(mut self, status: HealthStatus) -> Self {
        self.health = HealthMode::Reports(status);
        self
    }

    pub fn with_failing_health(mut self) -> Self {
        self.health = HealthMode::Fails;
        self
    }

    pub fn with_hanging_health(mut self) -> Self {
        self.health = HealthMode::Hangs;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Only take part in `workflow`
    pub fn only_for(mut self, workflow: WorkflowKind) -> Self {
        self.only = Some(workflow);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecondaryDependency for MockDependency {
    fn key(&self) -> &str {
        &self.key
    }

    async fn initialize(&self) -> DependencyResult<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health(&self) -> DependencyResult<Option<HealthStatus>> {
        match self.health {
            HealthMode::NoContract => Ok(None),
            HealthMode::Reports(status) => Ok(Some(status)),
            HealthMode::Fails => Err(DependencyError::failed("health endpoint error")),
            HealthMode::Hangs => std::future::pending().await,
        }
    }

    fn supports(&self, workflow: WorkflowKind) -> bool {
        self.only.map_or(true, |only| only == workflow)
    }

    async fn invoke(&self, call: &DependencyCall) -> DependencyResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DependencyError::failed(format!("{} unavailable", self.key)));
        }
        Ok(json!({ "source": self.key, "user_id": call.user_id }))
    }
}

#[derive(Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn create_record(&self, record: AuditRecord) -> DependencyResult<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

pub struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn create_record(&self, _record: AuditRecord) -> DependencyResult<()> {
        Err(DependencyError::failed("audit store offline"))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn send(&self, notification: Notification) -> DependencyResult<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

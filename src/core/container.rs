//! Dependency injection container
//!
//! This module provides the container that names every collaborator the
//! orchestrator talks to. It is assembled once at startup and handed to
//! the orchestrator by value.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{
    context::{WorkflowKind, WorkflowRequest},
    error::DependencyResult,
    traits::{
        ArtifactBuilder, AuditSink, Notification, NotificationSink, PreconditionValidator,
        PrimaryService, ResultCache, SecondaryDependency,
    },
};
use crate::sinks::LogAuditSink;

/// Named, typed set of collaborators
pub struct ServiceContainer {
    /// System of record for every workflow
    primary: Arc<dyn PrimaryService>,

    /// Secondary dependencies fanned out to, in registration order
    secondaries: Vec<Arc<dyn SecondaryDependency>>,

    validator: Arc<dyn PreconditionValidator>,

    audit: Arc<dyn AuditSink>,

    notifier: Arc<dyn NotificationSink>,

    /// Optional cache for dashboard results
    cache: Option<Arc<dyn ResultCache>>,

    artifacts: Arc<dyn ArtifactBuilder>,
}

impl ServiceContainer {
    /// Create a container around the primary service with default collaborators
    pub fn new(primary: Arc<dyn PrimaryService>) -> Self {
        Self {
            primary,
            secondaries: Vec::new(),
            validator: Arc::new(AcceptAll),
            audit: Arc::new(LogAuditSink),
            notifier: Arc::new(NoopNotifier),
            cache: None,
            artifacts: Arc::new(NoArtifacts),
        }
    }

    /// Register a secondary dependency, replacing any with the same key
    pub fn with_secondary(mut self, dependency: Arc<dyn SecondaryDependency>) -> Self {
        if let Some(pos) = self
            .secondaries
            .iter()
            .position(|d| d.key() == dependency.key())
        {
            log::warn!("Replacing secondary dependency '{}'", dependency.key());
            self.secondaries[pos] = dependency;
        } else {
            self.secondaries.push(dependency);
        }
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn PreconditionValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_artifact_builder(mut self, artifacts: Arc<dyn ArtifactBuilder>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn primary(&self) -> &Arc<dyn PrimaryService> {
        &self.primary
    }

    pub fn secondaries(&self) -> &[Arc<dyn SecondaryDependency>] {
        &self.secondaries
    }

    /// Keys of all tracked secondary dependencies
    pub fn secondary_keys(&self) -> Vec<String> {
        self.secondaries.iter().map(|d| d.key().to_string()).collect()
    }

    pub fn validator(&self) -> &Arc<dyn PreconditionValidator> {
        &self.validator
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn notifier(&self) -> &Arc<dyn NotificationSink> {
        &self.notifier
    }

    pub fn cache(&self) -> Option<&Arc<dyn ResultCache>> {
        self.cache.as_ref()
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactBuilder> {
        &self.artifacts
    }
}

/// Validator that only rejects requests without a user
pub struct AcceptAll;

#[async_trait]
impl PreconditionValidator for AcceptAll {
    async fn validate(&self, request: &WorkflowRequest) -> Result<(), String> {
        if request.user_id.trim().is_empty() {
            return Err("user_id must not be empty".to_string());
        }
        Ok(())
    }
}

/// No-op notification sink
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn send(&self, _notification: Notification) -> DependencyResult<()> {
        Ok(())
    }
}

/// Artifact builder that derives nothing
pub struct NoArtifacts;

impl ArtifactBuilder for NoArtifacts {
    fn build(
        &self,
        _workflow: WorkflowKind,
        _primary: &Value,
        _succeeded: &BTreeMap<String, Value>,
    ) -> Map<String, Value> {
        Map::new()
    }
}

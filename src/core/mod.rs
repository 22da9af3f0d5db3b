//! Core abstractions and interfaces for conductor
//!
//! This module provides the foundational traits, types, and utilities
//! that the resilience and orchestration layers build on.

pub mod container;
pub mod context;
pub mod error;
pub mod status;
pub mod traits;

// Re-export commonly used types
pub use container::ServiceContainer;
pub use context::{DependencyCall, WorkflowKind, WorkflowRequest};
pub use error::{
    BreakerError, DependencyError, DependencyResult, OrchestratorError, OrchestratorResult,
};
pub use status::Readiness;
pub use traits::*;

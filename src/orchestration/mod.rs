//! Workflow orchestration layer
//!
//! This module coordinates the primary call, the concurrent fan-out to
//! secondary dependencies and the side effects that follow, and owns the
//! lifecycle of the background tasks around them.

pub mod executor;
pub mod lifecycle;
pub mod orchestrator;
pub mod result;

pub use executor::{FanOutCall, FanOutExecutor};
pub use lifecycle::ComponentLifecycle;
pub use orchestrator::Orchestrator;
pub use result::{Completion, DependencyOutcome, FailureReason, OperationResult};

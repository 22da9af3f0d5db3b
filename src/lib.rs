//! This crate contains the core logic of the conductor workflow orchestrator.
//!
//! It coordinates a primary system of record with secondary dependencies,
//! isolating each behind a circuit breaker, and aggregates their results.

pub mod config;
pub mod core;
pub mod event;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod orchestration;
pub mod resilience;
pub mod sinks;

#[cfg(test)]
pub(crate) mod testing;

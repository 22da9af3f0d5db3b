//! Failure isolation primitives

pub mod circuit_breaker;

pub use circuit_breaker::{
    BreakerPolicy, BreakerSnapshot, BreakerState, CircuitBreaker, CircuitBreakerRegistry,
};

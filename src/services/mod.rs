//! Services
//!
//! The memory store backends and the circuit breaker used by network-backed
//! companions.

pub mod circuit_breaker;
pub mod memory;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState};

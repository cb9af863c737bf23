//! REST plumbing shared by the remote cache and store backends.

pub mod circuit_breaker;
pub mod client;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{Replay, RestClient};

//! Pylon Load Balance Library
//!
//! This library provides the request routing core for the Pylon system including:
//! - Endpoint registry with per-endpoint circuit state and window budgets
//! - Periodic canary health checking
//! - Retrying request dispatch with backoff
//! - Request outcome metrics

pub mod loadbalance;

// Re-export commonly used types
pub use loadbalance::{
    CanaryProbe, CircuitState, DispatchError, EndpointRegistry, EndpointSnapshot,
    EndpointStatus, HealthMonitor, HealthStatus, MetricsRecorder, MetricsSnapshot, ProbeResult,
    RequestDispatcher, RequestOutcome, RetryPolicy, RouterService, RpcCanary,
};

pub mod registry;
pub mod metrics;
pub mod dispatcher;
pub mod health_checker;
pub mod service;
pub mod traits;

#[cfg(test)]
mod registry_tests;

pub use registry::{CircuitState, EndpointRegistry, EndpointSnapshot, EndpointStatus, HealthStatus};
pub use metrics::{MetricsRecorder, MetricsSnapshot, RequestOutcome};
pub use dispatcher::{DispatchError, RequestDispatcher, RetryPolicy};
pub use health_checker::{HealthMonitor, ProbeResult};
pub use service::RouterService;
pub use traits::{CanaryProbe, RpcCanary};

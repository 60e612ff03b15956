pub mod router;
pub mod health;
pub mod metrics;
pub mod endpoints;
pub mod rpc;

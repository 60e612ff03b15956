//! Pylon Core Library
//!
//! This library provides core functionality for the Pylon RPC router including:
//! - Configuration management
//! - The JSON-RPC upstream client
//! - Typed upstream error classification

pub mod config;
pub mod client;

// Re-export commonly used types
pub use config::model::{
    normalize_endpoint_url, validate_dynamic_endpoint_url, Config, EndpointAdmissionError,
    EndpointConfig, GlobalSettings, RetrySettings, ServerSettings,
};
pub use client::{EndpointHandle, ErrorClass, RpcClient, UpstreamError};

//! Pylon API Server Library
//!
//! This library provides the HTTP front end for the Pylon request router

pub mod app;
pub mod router;
pub mod observability;

// Re-export the main server function
pub use app::start_server;

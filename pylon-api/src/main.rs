//! Pylon API Server
//!
//! Main entry point for the Pylon JSON-RPC routing service

use pylon_api::start_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    start_server().await
}

//! Pylon CLI Tool
//!
//! Command line interface for validating configuration and exercising endpoints

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pylon_core::config::loader::load_config_from_path;
use pylon_core::EndpointHandle;
use pylon_loadbalance::{ProbeResult, RouterService};
use serde_json::Value;
use tracing::debug;

#[derive(Parser)]
#[command(name = "pylon-cli")]
#[command(about = "A CLI tool for managing the Pylon router")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    ValidateConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Generate example configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config_example.toml")]
        output: String,
    },
    /// Run one round of canary probes
    HealthCheck {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
        /// Specific endpoint to check
        #[arg(short, long)]
        endpoint: Option<String>,
    },
    /// Dispatch a single JSON-RPC call through the router
    Call {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
        /// JSON-RPC method name
        #[arg(short, long)]
        method: String,
        /// JSON-encoded params
        #[arg(short, long, default_value = "[]")]
        params: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            println!("Validating configuration file: {}", config);
            match load_config_from_path(&config) {
                Ok(cfg) => {
                    println!("✅ Configuration is valid");
                    println!("  - {} endpoints configured", cfg.endpoints.len());
                    println!("  - window: {}s", cfg.settings.window_seconds);
                    println!("  - max attempts: {}", cfg.settings.retry.max_attempts);
                }
                Err(e) => {
                    eprintln!("❌ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::GenerateConfig { output } => {
            println!("Generating configuration file: {}", output);
            std::fs::write(&output, EXAMPLE_CONFIG)?;
            println!("✅ Configuration file generated successfully");
        }
        Commands::HealthCheck { config, endpoint } => {
            println!("Performing health check...");
            let cfg = load_config_from_path(&config)?;
            let service = RouterService::new(cfg)?;

            let results = match endpoint {
                Some(name) => {
                    println!("Checking endpoint: {}", name);
                    match service.check_endpoint(&name).await {
                        Some(result) => vec![result],
                        None => {
                            eprintln!("❌ Endpoint '{}' not found", name);
                            std::process::exit(1);
                        }
                    }
                }
                None => service.check_now().await,
            };

            for result in &results {
                print_probe(result);
            }

            if !results.iter().any(ProbeResult::is_healthy) {
                eprintln!("❌ No healthy endpoints");
                std::process::exit(1);
            }
            println!("✅ Health check completed");
        }
        Commands::Call {
            config,
            method,
            params,
        } => {
            let params: Value = serde_json::from_str(&params)
                .with_context(|| format!("params is not valid JSON: {}", params))?;
            let cfg = load_config_from_path(&config)?;
            call_method(cfg, &method, params).await?;
        }
    }

    Ok(())
}

fn print_probe(result: &ProbeResult) {
    match &result.error {
        None => println!("🟢 {} ({}ms)", result.endpoint, result.latency_ms),
        Some(error) => println!("🔴 {} ({}ms): {}", result.endpoint, result.latency_ms, error),
    }
}

/// 通过一次性的路由服务调度单个调用
async fn call_method(config: pylon_core::Config, method: &str, params: Value) -> Result<()> {
    let service = RouterService::new(config)?;

    let result = service
        .execute(|endpoint: EndpointHandle| {
            let params = params.clone();
            async move {
                debug!("Calling {} via endpoint '{}'", method, endpoint.name);
                endpoint.client.call::<Value>(method, params).await
            }
        })
        .await;

    let failed = match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            false
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            true
        }
    };

    println!();
    println!("📊 Metrics");
    println!("{}", serde_json::to_string_pretty(&service.get_metrics_snapshot())?);

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

const EXAMPLE_CONFIG: &str = r#"# Pylon Configuration File
# Upstream JSON-RPC endpoints are tried in round-robin order.

[[endpoints]]
name = "primary"
url = "https://rpc-primary.example.com"
max_requests_per_window = 100

[[endpoints]]
name = "secondary"
url = "https://rpc-secondary.example.com"
max_requests_per_window = 40

[settings]
window_seconds = 60
health_check_interval_seconds = 60
health_check_timeout_seconds = 10
request_timeout_seconds = 30
canary_method = "getSlot"
outcome_history_size = 1000

[settings.retry]
max_attempts = 5
inter_attempt_delay_ms = 2000
inter_attempt_delay_cap_ms = 10000
rate_limit_backoff_ms = 5000
rate_limit_backoff_cap_ms = 30000
failure_delay_ms = 1000
empty_pool_delay_ms = 1000

[server]
bind_address = "127.0.0.1:8899"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_core::config::loader::parse_config;

    #[test]
    fn test_example_config_is_valid() {
        let config = parse_config(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].max_requests_per_window, 40);
        assert_eq!(config.settings.canary_method, "getSlot");
        assert_eq!(config.server.bind_address, "127.0.0.1:8899");
    }

    #[test]
    fn test_cli_parses_call() {
        let cli = Cli::try_parse_from([
            "pylon-cli",
            "call",
            "--method",
            "getBalance",
            "--params",
            r#"["addr"]"#,
        ])
        .unwrap();

        match cli.command {
            Commands::Call { config, method, params } => {
                assert_eq!(config, "config.toml");
                assert_eq!(method, "getBalance");
                assert_eq!(params, r#"["addr"]"#);
            }
            _ => panic!("expected call subcommand"),
        }
    }
}

use crate::router::router::create_app_router;
use pylon_core::config::loader::{get_config_path, load_config};
use pylon_core::Config;
use pylon_loadbalance::RouterService;

use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 应用状态，包含路由服务
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RouterService>,
    pub config: Arc<Config>,
    #[cfg(feature = "observability")]
    pub prometheus_metrics: Option<crate::observability::prometheus_metrics::PrometheusMetrics>,
}

impl AppState {
    /// 加载配置、创建并启动路由服务
    pub fn new() -> Result<Self> {
        let config = load_config()?;
        info!("Configuration loaded successfully from: {}", get_config_path());

        let service = Arc::new(RouterService::new(config)?);
        service.start();
        info!("Router service started");

        Ok(Self::from_service(service))
    }

    /// 基于已有的路由服务构造状态，不改变服务的运行状态
    pub fn from_service(service: Arc<RouterService>) -> Self {
        let config = service.config();

        #[cfg(feature = "observability")]
        let prometheus_metrics =
            match crate::observability::prometheus_metrics::PrometheusMetrics::new() {
                Ok(metrics) => {
                    info!("Prometheus metrics initialized");
                    Some(metrics)
                }
                Err(e) => {
                    error!("Failed to initialize Prometheus metrics: {}", e);
                    None
                }
            };

        Self {
            service,
            config,
            #[cfg(feature = "observability")]
            prometheus_metrics,
        }
    }

    /// 停止应用
    pub async fn shutdown(&self) {
        info!("Shutting down application...");
        self.service.stop().await;
        info!("Application shutdown complete");
    }
}

/// 创建应用路由
pub fn create_app(state: AppState) -> Router {
    create_app_router().with_state(state)
}

/// 启动应用服务器
pub async fn start_server() -> Result<()> {
    // 初始化日志 - 完全依赖RUST_LOG环境变量
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting Pylon API server...");
    info!("Configuration file: {}", get_config_path());

    let app_state = match AppState::new() {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            return Err(e);
        }
    };

    let app = create_app(app_state.clone());

    let bind_addr = std::env::var("BIND_ADDRESS")
        .unwrap_or_else(|_| app_state.config.server.bind_address.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("Server listening on http://{}", addr);
    info!("Available endpoints:");
    info!("  GET  /              - API information");
    info!("  GET  /health        - Endpoint health report");
    info!("  GET  /metrics       - Request metrics snapshot");
    info!("  POST /endpoints     - Admit a discovered endpoint");
    info!("  POST /rpc           - Relay a JSON-RPC request");
    #[cfg(feature = "observability")]
    info!("  GET  /prometheus    - Prometheus exposition");

    let shutdown_signal = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

    if let Err(e) = server.await {
        error!("Server error: {}", e);
        app_state.shutdown().await;
        return Err(e.into());
    }

    app_state.shutdown().await;
    Ok(())
}

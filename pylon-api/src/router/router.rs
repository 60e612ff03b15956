use crate::app::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::{endpoints::add_endpoint, health::health_check, metrics::metrics, rpc::relay_rpc};

/// 创建应用路由
pub fn create_app_router() -> Router<AppState> {
    let router = Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/endpoints", post(add_endpoint))
        .route("/rpc", post(relay_rpc));

    #[cfg(feature = "observability")]
    let router = router.route(
        "/prometheus",
        get(crate::observability::prometheus_metrics::prometheus_metrics_handler),
    );

    router.layer(TraceLayer::new_for_http())
}

/// 首页处理器
pub async fn index() -> &'static str {
    "Pylon - Resilient JSON-RPC Router"
}

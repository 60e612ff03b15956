use crate::app::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use pylon_loadbalance::HealthStatus;

/// 端点健康报告，没有任何健康端点时返回503
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let health = state.service.get_health_status();
    let status = if health.total_healthy > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

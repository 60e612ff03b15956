use crate::app::AppState;
use axum::{extract::State, response::Json};
use pylon_loadbalance::MetricsSnapshot;

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.service.get_metrics_snapshot())
}

use crate::app::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use pylon_core::{EndpointAdmissionError, EndpointConfig};
use serde_json::{json, Value};
use tracing::{info, warn};

/// 接纳一个外部发现的端点
///
/// 请求体即端点配置，`max_requests_per_window` 可省略。
pub async fn add_endpoint(
    State(state): State<AppState>,
    Json(entry): Json<EndpointConfig>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    match state.service.add_endpoint(entry) {
        Ok(snapshot) => {
            info!("Admitted endpoint '{}' via API", snapshot.name);
            Ok((StatusCode::CREATED, Json(json!({ "endpoint": snapshot }))))
        }
        Err(e) => {
            warn!("Rejected endpoint admission: {}", e);
            Err((
                admission_status(&e),
                Json(json!({
                    "error": {
                        "type": "endpoint_rejected",
                        "message": e.to_string(),
                    }
                })),
            ))
        }
    }
}

fn admission_status(error: &EndpointAdmissionError) -> StatusCode {
    match error {
        EndpointAdmissionError::DuplicateName(..) | EndpointAdmissionError::DuplicateUrl(..) => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::BAD_REQUEST,
    }
}

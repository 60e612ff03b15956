use crate::app::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use pylon_core::EndpointHandle;
use pylon_loadbalance::DispatchError;
use serde_json::{json, Value};
use tracing::{debug, error};

/// JSON-RPC 2.0 服务端错误码
const ENDPOINTS_EXHAUSTED_CODE: i64 = -32000;

/// 通过调度器转发JSON-RPC请求
///
/// 上游返回的JSON原样交给调用方；重试预算耗尽时返回503和JSON-RPC风格的错误体。
pub async fn relay_rpc(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let method = body.get("method").and_then(Value::as_str).unwrap_or("<unknown>");
    debug!("Relaying JSON-RPC request: {}", method);

    let result = state
        .service
        .execute(|endpoint: EndpointHandle| {
            let body = &body;
            async move { endpoint.client.forward(body).await }
        })
        .await;

    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            error!("JSON-RPC request '{}' failed: {}", method, e);
            Err((StatusCode::SERVICE_UNAVAILABLE, Json(exhausted_body(&body, &e))))
        }
    }
}

fn exhausted_body(request: &Value, error: &DispatchError) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": ENDPOINTS_EXHAUSTED_CODE,
            "message": error.to_string(),
            "data": {
                "attempts": error.attempts(),
                "last_error_class": error.last_error().map(|e| e.class),
            }
        }
    })
}

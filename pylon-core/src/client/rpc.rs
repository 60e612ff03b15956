use super::types::{ErrorClass, UpstreamError};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// JSON-RPC 2.0 客户端
///
/// 每个端点持有一个实例；克隆开销很小，内部共享连接池与请求ID计数器。
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    /// 创建新的客户端，`timeout` 约束每一次上游调用
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client, url))
    }

    /// 使用已有的 reqwest 客户端（共享连接池）
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 调用JSON-RPC方法并反序列化 `result` 字段
    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, UpstreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("Calling {} on {} (id {})", method, self.url, id);
        let response = self.post(&body).await?;

        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            return Err(classify_rpc_error(error));
        }

        let result = response
            .get("result")
            .cloned()
            .ok_or_else(|| UpstreamError::other("JSON-RPC response has no result field"))?;

        serde_json::from_value(result)
            .map_err(|e| UpstreamError::other(format!("failed to decode result of {method}: {e}")))
    }

    /// 原样转发JSON-RPC请求体
    ///
    /// 仅对传输层和HTTP状态进行分类；200响应中的JSON-RPC `error` 属于应用层应答，原样返回。
    pub async fn forward(&self, body: &Value) -> Result<Value, UpstreamError> {
        self.post(body).await
    }

    async fn post(&self, body: &Value) -> Result<Value, UpstreamError> {
        let response = self.client.post(&self.url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status, &text));
        }

        Ok(response.json::<Value>().await?)
    }
}

/// 对JSON-RPC错误对象分类
pub(crate) fn classify_rpc_error(error: &Value) -> UpstreamError {
    let code = error.get("code").and_then(Value::as_i64);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown JSON-RPC error");
    let text = match code {
        Some(code) => format!("JSON-RPC error {code}: {message}"),
        None => format!("JSON-RPC error: {message}"),
    };

    let lower = message.to_lowercase();
    let class = if code == Some(429)
        || lower.contains("too many requests")
        || lower.contains("rate limit")
    {
        ErrorClass::RateLimited
    } else if code == Some(403) || lower.contains("forbidden") {
        ErrorClass::Forbidden
    } else {
        ErrorClass::Other
    };

    UpstreamError::new(class, text)
}

/// 传递给调用方工作闭包的端点句柄
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    pub name: String,
    pub url: String,
    pub client: RpcClient,
}

impl EndpointHandle {
    pub fn new(name: impl Into<String>, client: RpcClient) -> Self {
        let url = client.url().to_string();
        Self {
            name: name.into(),
            url,
            client,
        }
    }
}


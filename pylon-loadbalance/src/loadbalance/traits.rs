use async_trait::async_trait;
use pylon_core::{EndpointHandle, UpstreamError};
use serde_json::{json, Value};

/// 金丝雀探测接口
///
/// 对端点执行一次廉价、无副作用的调用以判断存活。
/// 分离出来以便注入脚本化的探测进行单元测试。
#[async_trait]
pub trait CanaryProbe: Send + Sync {
    async fn probe(&self, endpoint: &EndpointHandle) -> Result<(), UpstreamError>;
}

/// 基于JSON-RPC方法的默认探测（如 Solana 的 `getSlot`）
#[derive(Debug, Clone)]
pub struct RpcCanary {
    method: String,
}

impl RpcCanary {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

#[async_trait]
impl CanaryProbe for RpcCanary {
    async fn probe(&self, endpoint: &EndpointHandle) -> Result<(), UpstreamError> {
        endpoint
            .client
            .call::<Value>(&self.method, json!([]))
            .await
            .map(|_| ())
    }
}

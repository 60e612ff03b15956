use super::registry::EndpointRegistry;
use super::traits::CanaryProbe;
use futures::future::join_all;
use pylon_core::{EndpointHandle, ErrorClass, UpstreamError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 单个端点的探测结果
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub endpoint: String,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub error_class: Option<ErrorClass>,
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

/// 健康检查器
/// 定期对所有端点执行金丝雀探测，结果写回注册表
pub struct HealthMonitor {
    registry: Arc<EndpointRegistry>,
    probe: Arc<dyn CanaryProbe>,
    check_interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        probe: Arc<dyn CanaryProbe>,
        check_interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            probe,
            check_interval,
            probe_timeout,
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// 在后台启动周期检查，取消令牌触发后退出
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(cancel).await;
        })
    }

    /// 周期检查循环，首次检查立即执行
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Starting health monitor with interval: {:?}",
            self.check_interval
        );

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.check_now() => {}
            }
        }

        info!("Health monitor stopped");
    }

    /// 立即对所有端点执行一轮探测
    ///
    /// 探测并发进行且不持有注册表锁；每个探测完成时立即写回其结果。
    pub async fn check_now(&self) -> Vec<ProbeResult> {
        let endpoints = self.registry.handles();
        debug!("Starting health check for {} endpoints", endpoints.len());

        let results = join_all(endpoints.iter().map(|e| async move {
            let result = self.probe_endpoint(e).await;
            self.apply(&result);
            result
        }))
        .await;

        let healthy = results.iter().filter(|r| r.is_healthy()).count();
        debug!(
            "Completed health check: {}/{} endpoints responded",
            healthy,
            results.len()
        );
        results
    }

    /// 探测单个端点
    pub async fn check_endpoint(&self, name: &str) -> Option<ProbeResult> {
        let endpoint = self
            .registry
            .handles()
            .into_iter()
            .find(|e| e.name == name)?;

        let result = self.probe_endpoint(&endpoint).await;
        self.apply(&result);
        Some(result)
    }

    async fn probe_endpoint(&self, endpoint: &EndpointHandle) -> ProbeResult {
        let start = Instant::now();
        let outcome = match timeout(self.probe_timeout, self.probe.probe(endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::transient(format!(
                "health probe timed out after {}ms",
                self.probe_timeout.as_millis()
            ))),
        };
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(()) => ProbeResult {
                endpoint: endpoint.name.clone(),
                latency_ms,
                error: None,
                error_class: None,
            },
            Err(err) => ProbeResult {
                endpoint: endpoint.name.clone(),
                latency_ms,
                error_class: Some(probe_failure_class(err.class)),
                error: Some(err.message),
            },
        }
    }

    fn apply(&self, result: &ProbeResult) {
        match result.error_class {
            None => {
                debug!(
                    "Endpoint '{}' passed health probe ({}ms)",
                    result.endpoint, result.latency_ms
                );
                self.registry.mark_success(&result.endpoint, result.latency_ms);
            }
            Some(class) => {
                warn!(
                    "Endpoint '{}' failed health probe: {}",
                    result.endpoint,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                self.registry.mark_failure(&result.endpoint, class);
            }
        }
    }
}

/// 探测失败一律视为网络瞬时故障，除非明确为限流或拒绝访问
fn probe_failure_class(class: ErrorClass) -> ErrorClass {
    match class {
        ErrorClass::RateLimited | ErrorClass::Forbidden => class,
        _ => ErrorClass::TransientNetwork,
    }
}

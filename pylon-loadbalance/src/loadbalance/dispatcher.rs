use super::metrics::{MetricsRecorder, RequestOutcome};
use super::registry::EndpointRegistry;
use pylon_core::config::model::RetrySettings;
use pylon_core::{EndpointHandle, ErrorClass, UpstreamError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

/// 调度失败
///
/// 单个端点的失败在本地完全恢复，只有重试预算耗尽才会返回给调用方。
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("endpoints exhausted after {attempts} attempts{}", last_error_suffix(.last_error))]
    EndpointsExhausted {
        attempts: u32,
        #[source]
        last_error: Option<UpstreamError>,
    },
}

impl DispatchError {
    pub fn attempts(&self) -> u32 {
        match self {
            DispatchError::EndpointsExhausted { attempts, .. } => *attempts,
        }
    }

    /// 最后一次观察到的上游错误
    pub fn last_error(&self) -> Option<&UpstreamError> {
        match self {
            DispatchError::EndpointsExhausted { last_error, .. } => last_error.as_ref(),
        }
    }
}

fn last_error_suffix(last_error: &Option<UpstreamError>) -> String {
    match last_error {
        Some(e) => format!(": {e}"),
        None => String::new(),
    }
}

/// 重试与退避策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub inter_attempt_delay: Duration,
    pub inter_attempt_delay_cap: Duration,
    pub rate_limit_backoff: Duration,
    pub rate_limit_backoff_cap: Duration,
    pub failure_delay: Duration,
    pub empty_pool_delay: Duration,
}

impl RetryPolicy {
    /// 第 `attempt` 次尝试（从0开始）之前的等待；首次尝试不等待
    pub fn inter_attempt_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.inter_attempt_delay
            .saturating_mul(attempt)
            .min(self.inter_attempt_delay_cap)
    }

    /// 第 `attempt` 次尝试失败后的退避
    ///
    /// 限流按 `rate_limit_backoff * 2^attempt` 指数退避，其他错误使用固定延迟。
    pub fn failure_backoff(&self, attempt: u32, class: ErrorClass) -> Duration {
        match class {
            ErrorClass::RateLimited => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                self.rate_limit_backoff
                    .saturating_mul(factor)
                    .min(self.rate_limit_backoff_cap)
            }
            _ => self.failure_delay,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            inter_attempt_delay: Duration::from_millis(settings.inter_attempt_delay_ms),
            inter_attempt_delay_cap: Duration::from_millis(settings.inter_attempt_delay_cap_ms),
            rate_limit_backoff: Duration::from_millis(settings.rate_limit_backoff_ms),
            rate_limit_backoff_cap: Duration::from_millis(settings.rate_limit_backoff_cap_ms),
            failure_delay: Duration::from_millis(settings.failure_delay_ms),
            empty_pool_delay: Duration::from_millis(settings.empty_pool_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

/// 请求调度器
///
/// 选择健康端点执行调用方的工作闭包，失败时对其他端点退避重试。
pub struct RequestDispatcher {
    registry: Arc<EndpointRegistry>,
    metrics: Arc<MetricsRecorder>,
    policy: RetryPolicy,
}

impl RequestDispatcher {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        metrics: Arc<MetricsRecorder>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            metrics,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 执行一个工作单元
    ///
    /// `work` 必须可安全重试，且自行约束单次上游调用的超时。
    /// 最多尝试 `max_attempts` 次；全部失败时返回携带最后一个错误的
    /// [`DispatchError::EndpointsExhausted`]。
    pub async fn execute<T, F, Fut>(&self, mut work: F) -> Result<T, DispatchError>
    where
        F: FnMut(EndpointHandle) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut last_error: Option<UpstreamError> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                sleep(self.policy.inter_attempt_delay(attempt)).await;
            }

            let Some(endpoint) = self.registry.list_healthy().into_iter().next() else {
                warn!(
                    "No endpoints available on attempt {}/{}",
                    attempt + 1,
                    max_attempts
                );
                sleep(self.policy.empty_pool_delay).await;
                continue;
            };

            debug!(
                "Dispatch attempt {}/{} using endpoint '{}'",
                attempt + 1,
                max_attempts,
                endpoint.name
            );

            let name = endpoint.name.clone();
            let start = Instant::now();
            match work(endpoint).await {
                Ok(value) => {
                    let latency_ms = elapsed_ms(start);
                    self.registry.mark_success(&name, latency_ms);
                    self.metrics.record(RequestOutcome::success(&name, latency_ms));
                    debug!(
                        "Endpoint '{}' succeeded on attempt {} in {}ms",
                        name,
                        attempt + 1,
                        latency_ms
                    );
                    return Ok(value);
                }
                Err(err) => {
                    let latency_ms = elapsed_ms(start);
                    let class = err.class;
                    warn!(
                        "Endpoint '{}' failed on attempt {}/{}: {}",
                        name,
                        attempt + 1,
                        max_attempts,
                        err
                    );

                    self.registry.mark_failure(&name, class);
                    self.metrics
                        .record(RequestOutcome::failure(&name, latency_ms, class));
                    last_error = Some(err);

                    // 最后一次尝试之后没有下一轮，无需退避
                    if attempt + 1 < max_attempts {
                        let backoff = self.policy.failure_backoff(attempt, class);
                        debug!("Backing off {}ms after {} error", backoff.as_millis(), class);
                        sleep(backoff).await;
                    }
                }
            }
        }

        let err = DispatchError::EndpointsExhausted {
            attempts: max_attempts,
            last_error,
        };
        error!("{}", err);
        Err(err)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

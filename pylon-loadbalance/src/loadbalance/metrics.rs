use super::registry::EndpointRegistry;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pylon_core::ErrorClass;
use serde::Serialize;
use std::collections::VecDeque;

/// 单次调度尝试的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestOutcome {
    pub success: bool,
    pub latency_ms: u64,
    pub error_class: Option<ErrorClass>,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
}

impl RequestOutcome {
    pub fn success(endpoint: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: true,
            latency_ms,
            error_class: None,
            endpoint: endpoint.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(endpoint: impl Into<String>, latency_ms: u64, class: ErrorClass) -> Self {
        Self {
            success: false,
            latency_ms,
            error_class: Some(class),
            endpoint: endpoint.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 聚合指标视图
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub rate_limited_requests: u64,
    pub forbidden_requests: u64,
    pub other_errors: u64,
    pub average_response_time_ms: f64,
    pub success_rate_percent: f64,
    pub healthy_endpoint_count: usize,
    pub total_endpoint_count: usize,
}

#[derive(Debug, Default)]
struct Totals {
    total_requests: u64,
    successful_requests: u64,
    rate_limited_requests: u64,
    forbidden_requests: u64,
    other_errors: u64,
    total_latency_ms: u64,
}

#[derive(Debug)]
struct RecorderState {
    totals: Totals,
    history: VecDeque<RequestOutcome>,
}

/// 指标收集器
///
/// 持有有界的请求结果日志与累计计数，不直接修改端点状态。
pub struct MetricsRecorder {
    state: Mutex<RecorderState>,
    capacity: usize,
}

impl MetricsRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(RecorderState {
                totals: Totals::default(),
                history: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    /// 记录一次请求结果
    pub fn record(&self, outcome: RequestOutcome) {
        let mut state = self.state.lock();
        let totals = &mut state.totals;

        totals.total_requests += 1;
        totals.total_latency_ms = totals.total_latency_ms.saturating_add(outcome.latency_ms);

        if outcome.success {
            totals.successful_requests += 1;
        } else {
            match outcome.error_class {
                Some(ErrorClass::RateLimited) => totals.rate_limited_requests += 1,
                Some(ErrorClass::Forbidden) => totals.forbidden_requests += 1,
                _ => totals.other_errors += 1,
            }
        }

        if state.history.len() == self.capacity {
            state.history.pop_front();
        }
        state.history.push_back(outcome);
    }

    /// 生成指标快照，端点健康计数在调用时从注册表读取
    pub fn snapshot(&self, registry: &EndpointRegistry) -> MetricsSnapshot {
        let (healthy_endpoint_count, total_endpoint_count) = registry.health_counts();
        let state = self.state.lock();
        let totals = &state.totals;

        let (average_response_time_ms, success_rate_percent) = if totals.total_requests == 0 {
            (0.0, 0.0)
        } else {
            let total = totals.total_requests as f64;
            (
                totals.total_latency_ms as f64 / total,
                totals.successful_requests as f64 / total * 100.0,
            )
        };

        MetricsSnapshot {
            total_requests: totals.total_requests,
            successful_requests: totals.successful_requests,
            rate_limited_requests: totals.rate_limited_requests,
            forbidden_requests: totals.forbidden_requests,
            other_errors: totals.other_errors,
            average_response_time_ms,
            success_rate_percent,
            healthy_endpoint_count,
            total_endpoint_count,
        }
    }

    /// 最近的 `limit` 条结果，按时间先后排列
    pub fn recent_outcomes(&self, limit: usize) -> Vec<RequestOutcome> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn total_requests(&self) -> u64 {
        self.state.lock().totals.total_requests
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(1000)
    }
}

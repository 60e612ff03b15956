use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pylon_core::config::model::{
    normalize_endpoint_url, validate_dynamic_endpoint_url, EndpointAdmissionError, EndpointConfig,
};
use pylon_core::{EndpointHandle, ErrorClass, RpcClient};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 端点熔断状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Healthy,
    Unhealthy,
}

impl CircuitState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, CircuitState::Healthy)
    }
}

/// 注册表内部的端点条目
#[derive(Debug)]
struct EndpointEntry {
    name: String,
    url: String,
    max_requests_per_window: u32,
    requests_this_window: u32,
    error_count: u64,
    last_error_at: Option<DateTime<Utc>>,
    last_error_class: Option<ErrorClass>,
    average_latency_ms: u64,
    state: CircuitState,
    client: RpcClient,
}

impl EndpointEntry {
    fn handle(&self) -> EndpointHandle {
        EndpointHandle {
            name: self.name.clone(),
            url: self.url.clone(),
            client: self.client.clone(),
        }
    }

    fn is_eligible(&self) -> bool {
        self.state.is_healthy() && self.requests_this_window < self.max_requests_per_window
    }

    fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            name: self.name.clone(),
            url: self.url.clone(),
            max_requests_per_window: self.max_requests_per_window,
            requests_this_window: self.requests_this_window,
            error_count: self.error_count,
            last_error_at: self.last_error_at,
            last_error_class: self.last_error_class,
            average_latency_ms: self.average_latency_ms,
            state: self.state,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    endpoints: Vec<EndpointEntry>,
    round_robin: usize,
}

/// 端点某一时刻的只读视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    pub url: String,
    pub max_requests_per_window: u32,
    pub requests_this_window: u32,
    pub error_count: u64,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error_class: Option<ErrorClass>,
    pub average_latency_ms: u64,
    pub state: CircuitState,
}

impl EndpointSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.state.is_healthy()
    }
}

/// 状态报告中的单个端点
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub name: String,
    pub url: String,
    pub is_healthy: bool,
    pub request_count: u32,
    pub max_requests_per_window: u32,
    pub error_count: u64,
    pub avg_response_time_ms: u64,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error_class: Option<ErrorClass>,
}

/// 健康状态报告
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub endpoints: Vec<EndpointStatus>,
    pub total_healthy: usize,
    pub total_endpoints: usize,
}

/// 端点注册表
///
/// 独占端点集合。所有变更都通过注册表方法在同一把锁内完成，
/// 锁只在计数器和标志更新期间持有，绝不跨越网络I/O。
pub struct EndpointRegistry {
    state: Mutex<RegistryState>,
    http: Client,
}

impl EndpointRegistry {
    /// 根据静态配置创建注册表，所有端点初始为健康状态
    pub fn new(endpoints: &[EndpointConfig], request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let registry = Self {
            state: Mutex::new(RegistryState::default()),
            http,
        };

        {
            let mut state = registry.state.lock();
            for endpoint in endpoints {
                state.endpoints.push(registry.new_entry(endpoint));
            }
            info!("Registered {} static endpoints", state.endpoints.len());
        }

        Ok(registry)
    }

    fn new_entry(&self, config: &EndpointConfig) -> EndpointEntry {
        EndpointEntry {
            name: config.name.clone(),
            url: config.url.clone(),
            max_requests_per_window: config.max_requests_per_window,
            requests_this_window: 0,
            error_count: 0,
            last_error_at: None,
            last_error_class: None,
            average_latency_ms: 0,
            state: CircuitState::Healthy,
            client: RpcClient::with_client(self.http.clone(), config.url.clone()),
        }
    }

    /// 返回用于调度的候选端点序列
    ///
    /// 过滤出健康且未达窗口上限的端点，并按轮询下标旋转起点；
    /// 若过滤结果为空，则在全局 `requests_this_window` 最小的端点中（无视健康状态）
    /// 按同一轮询下标挑选一个，保证调度器总有可尝试的目标，且负载相同时不会反复落在同一端点。
    /// 注册表为空时返回空序列。
    pub fn list_healthy(&self) -> Vec<EndpointHandle> {
        let mut state = self.state.lock();

        let eligible: Vec<usize> = state
            .endpoints
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_eligible())
            .map(|(i, _)| i)
            .collect();

        if eligible.is_empty() {
            let Some(min_load) = state.endpoints.iter().map(|e| e.requests_this_window).min() else {
                return Vec::new();
            };
            let least_loaded: Vec<usize> = state
                .endpoints
                .iter()
                .enumerate()
                .filter(|(_, e)| e.requests_this_window == min_load)
                .map(|(i, _)| i)
                .collect();

            let pick = least_loaded[state.round_robin % least_loaded.len()];
            state.round_robin = state.round_robin.wrapping_add(1);

            let fallback = &state.endpoints[pick];
            debug!(
                "No eligible endpoints, falling back to least-loaded endpoint '{}' \
                 ({} requests this window)",
                fallback.name, fallback.requests_this_window
            );
            return vec![fallback.handle()];
        }

        let start = state.round_robin % eligible.len();
        state.round_robin = state.round_robin.wrapping_add(1);

        eligible
            .iter()
            .cycle()
            .skip(start)
            .take(eligible.len())
            .map(|&i| state.endpoints[i].handle())
            .collect()
    }

    /// 记录一次成功：计数、平滑延迟、立即恢复健康
    pub fn mark_success(&self, name: &str, latency_ms: u64) {
        let mut state = self.state.lock();
        let Some(entry) = state.endpoints.iter_mut().find(|e| e.name == name) else {
            warn!("mark_success called for unknown endpoint '{}'", name);
            return;
        };

        entry.requests_this_window = entry.requests_this_window.saturating_add(1);
        entry.average_latency_ms = if entry.average_latency_ms == 0 {
            latency_ms
        } else {
            (entry.average_latency_ms + latency_ms) / 2
        };

        if entry.state == CircuitState::Unhealthy {
            info!("Endpoint '{}' recovered after successful request", name);
        }
        entry.state = CircuitState::Healthy;
    }

    /// 记录一次失败：单次失败即移出健康轮询
    pub fn mark_failure(&self, name: &str, class: ErrorClass) {
        let mut state = self.state.lock();
        let Some(entry) = state.endpoints.iter_mut().find(|e| e.name == name) else {
            warn!("mark_failure called for unknown endpoint '{}'", name);
            return;
        };

        entry.error_count += 1;
        entry.last_error_at = Some(Utc::now());
        entry.last_error_class = Some(class);

        if entry.state == CircuitState::Healthy {
            warn!("Endpoint '{}' marked unhealthy ({})", name, class);
        }
        entry.state = CircuitState::Unhealthy;
    }

    /// 重置所有端点的窗口计数，不影响健康状态与错误计数
    pub fn reset_window_counters(&self) {
        let mut state = self.state.lock();
        for entry in state.endpoints.iter_mut() {
            entry.requests_this_window = 0;
        }
        debug!("Reset window counters for {} endpoints", state.endpoints.len());
    }

    /// 动态添加端点（来自外部发现）
    ///
    /// 仅接受格式正确的https地址，且不能指向私有或回环地址。
    pub fn add_endpoint(
        &self,
        mut config: EndpointConfig,
    ) -> Result<EndpointSnapshot, EndpointAdmissionError> {
        if config.name.trim().is_empty() {
            return Err(EndpointAdmissionError::EmptyName);
        }
        if config.max_requests_per_window == 0 {
            return Err(EndpointAdmissionError::InvalidLimit(config.name));
        }
        validate_dynamic_endpoint_url(&config.url)?;
        let normalized = normalize_endpoint_url(&config.url);

        let mut state = self.state.lock();
        if state.endpoints.iter().any(|e| e.name == config.name) {
            return Err(EndpointAdmissionError::DuplicateName(config.name));
        }
        if state
            .endpoints
            .iter()
            .any(|e| normalize_endpoint_url(&e.url) == normalized)
        {
            return Err(EndpointAdmissionError::DuplicateUrl(config.url));
        }
        config.url = normalized;

        let entry = self.new_entry(&config);
        let snapshot = entry.snapshot();
        state.endpoints.push(entry);
        info!("Admitted endpoint '{}' ({})", config.name, config.url);

        Ok(snapshot)
    }

    /// 所有端点的句柄（供健康检查使用）
    pub fn handles(&self) -> Vec<EndpointHandle> {
        self.state.lock().endpoints.iter().map(EndpointEntry::handle).collect()
    }

    pub fn get(&self, name: &str) -> Option<EndpointSnapshot> {
        self.state
            .lock()
            .endpoints
            .iter()
            .find(|e| e.name == name)
            .map(EndpointEntry::snapshot)
    }

    pub fn snapshots(&self) -> Vec<EndpointSnapshot> {
        self.state.lock().endpoints.iter().map(EndpointEntry::snapshot).collect()
    }

    /// 返回 (健康端点数, 端点总数)
    pub fn health_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        let healthy = state.endpoints.iter().filter(|e| e.state.is_healthy()).count();
        (healthy, state.endpoints.len())
    }

    pub fn len(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 健康状态报告
    pub fn get_health_status(&self) -> HealthStatus {
        let state = self.state.lock();
        let endpoints: Vec<EndpointStatus> = state
            .endpoints
            .iter()
            .map(|e| EndpointStatus {
                name: e.name.clone(),
                url: e.url.clone(),
                is_healthy: e.state.is_healthy(),
                request_count: e.requests_this_window,
                max_requests_per_window: e.max_requests_per_window,
                error_count: e.error_count,
                avg_response_time_ms: e.average_latency_ms,
                last_error_at: e.last_error_at,
                last_error_class: e.last_error_class,
            })
            .collect();

        let total_healthy = endpoints.iter().filter(|e| e.is_healthy).count();
        HealthStatus {
            total_endpoints: endpoints.len(),
            total_healthy,
            endpoints,
        }
    }
}

use anyhow::Result;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub settings: GlobalSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

/// 单个上游端点的静态配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    /// 每个窗口内允许的最大请求数（软上限）
    #[serde(default = "default_max_requests_per_window")]
    pub max_requests_per_window: u32,
}

impl EndpointConfig {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        max_requests_per_window: u32,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            max_requests_per_window,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GlobalSettings {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// 健康检查使用的轻量级JSON-RPC方法
    #[serde(default = "default_canary_method")]
    pub canary_method: String,
    #[serde(default = "default_outcome_history_size")]
    pub outcome_history_size: usize,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// 请求重试与退避配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 非首次尝试前的等待：inter_attempt_delay_ms * attempt，上限 inter_attempt_delay_cap_ms
    #[serde(default = "default_inter_attempt_delay")]
    pub inter_attempt_delay_ms: u64,
    #[serde(default = "default_inter_attempt_delay_cap")]
    pub inter_attempt_delay_cap_ms: u64,
    /// 限流退避：rate_limit_backoff_ms * 2^attempt，上限 rate_limit_backoff_cap_ms
    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit_backoff_ms: u64,
    #[serde(default = "default_rate_limit_backoff_cap")]
    pub rate_limit_backoff_cap_ms: u64,
    #[serde(default = "default_failure_delay")]
    pub failure_delay_ms: u64,
    #[serde(default = "default_empty_pool_delay")]
    pub empty_pool_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            health_check_interval_seconds: default_health_check_interval(),
            health_check_timeout_seconds: default_health_check_timeout(),
            request_timeout_seconds: default_request_timeout(),
            canary_method: default_canary_method(),
            outcome_history_size: default_outcome_history_size(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            inter_attempt_delay_ms: default_inter_attempt_delay(),
            inter_attempt_delay_cap_ms: default_inter_attempt_delay_cap(),
            rate_limit_backoff_ms: default_rate_limit_backoff(),
            rate_limit_backoff_cap_ms: default_rate_limit_backoff_cap(),
            failure_delay_ms: default_failure_delay(),
            empty_pool_delay_ms: default_empty_pool_delay(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl GlobalSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Config {
    /// 查找端点配置
    pub fn get_endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            anyhow::bail!("No endpoints configured");
        }

        let mut names = HashSet::new();
        let mut urls = HashSet::new();
        for endpoint in &self.endpoints {
            self.validate_endpoint_config(endpoint)?;

            if !names.insert(endpoint.name.as_str()) {
                anyhow::bail!("Duplicate endpoint name '{}'", endpoint.name);
            }
            if !urls.insert(normalize_endpoint_url(&endpoint.url)) {
                anyhow::bail!("Duplicate endpoint url '{}'", endpoint.url);
            }
        }

        self.validate_settings()
    }

    /// 验证单个静态端点配置
    ///
    /// 静态配置由运维人员提供，因此允许 http 与回环地址（本地节点）。
    fn validate_endpoint_config(&self, endpoint: &EndpointConfig) -> Result<()> {
        if endpoint.name.trim().is_empty() {
            anyhow::bail!("Endpoint with url '{}' has empty name", endpoint.url);
        }

        let url = Url::parse(&endpoint.url).map_err(|e| {
            anyhow::anyhow!(
                "Endpoint '{}' has invalid url '{}': {}",
                endpoint.name,
                endpoint.url,
                e
            )
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!(
                "Endpoint '{}' has invalid url format: '{}'. Must start with http:// or https://",
                endpoint.name,
                endpoint.url
            );
        }

        if url.host_str().is_none() {
            anyhow::bail!("Endpoint '{}' url has no host: '{}'", endpoint.name, endpoint.url);
        }

        if endpoint.max_requests_per_window == 0 {
            anyhow::bail!(
                "Endpoint '{}' has invalid max_requests_per_window: cannot be 0",
                endpoint.name
            );
        }

        Ok(())
    }

    fn validate_settings(&self) -> Result<()> {
        let settings = &self.settings;

        if settings.window_seconds == 0 {
            anyhow::bail!("settings.window_seconds cannot be 0");
        }
        if settings.health_check_interval_seconds == 0 {
            anyhow::bail!("settings.health_check_interval_seconds cannot be 0");
        }
        if settings.health_check_timeout_seconds == 0 {
            anyhow::bail!("settings.health_check_timeout_seconds cannot be 0");
        }
        if settings.request_timeout_seconds == 0 || settings.request_timeout_seconds > 300 {
            anyhow::bail!(
                "settings.request_timeout_seconds must be between 1 and 300, got {}",
                settings.request_timeout_seconds
            );
        }
        if settings.canary_method.trim().is_empty() {
            anyhow::bail!("settings.canary_method cannot be empty");
        }
        if settings.outcome_history_size == 0 {
            anyhow::bail!("settings.outcome_history_size cannot be 0");
        }
        if settings.retry.max_attempts == 0 || settings.retry.max_attempts > 20 {
            anyhow::bail!(
                "settings.retry.max_attempts must be between 1 and 20, got {}",
                settings.retry.max_attempts
            );
        }

        Ok(())
    }
}

/// 动态端点准入错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointAdmissionError {
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("endpoint url '{0}' must use https")]
    InsecureScheme(String),
    #[error("endpoint url '{0}' has no host")]
    MissingHost(String),
    #[error("endpoint url '{0}' points at a private or loopback address")]
    PrivateAddress(String),
    #[error("endpoint name '{0}' is already registered")]
    DuplicateName(String),
    #[error("endpoint url '{0}' is already registered")]
    DuplicateUrl(String),
    #[error("endpoint '{0}' has invalid max_requests_per_window: cannot be 0")]
    InvalidLimit(String),
    #[error("endpoint name cannot be empty")]
    EmptyName,
}

/// 端点URL的规范形式：小写主机、去掉默认端口与末尾斜杠，用于去重比较
pub fn normalize_endpoint_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => url.as_str().trim_end_matches('/').to_string(),
        Err(_) => raw.trim_end_matches('/').to_string(),
    }
}

/// 校验动态发现的端点URL：必须为https且不能指向私有或回环地址
pub fn validate_dynamic_endpoint_url(raw: &str) -> Result<Url, EndpointAdmissionError> {
    let url = Url::parse(raw).map_err(|e| EndpointAdmissionError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if url.scheme() != "https" {
        return Err(EndpointAdmissionError::InsecureScheme(raw.to_string()));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| EndpointAdmissionError::MissingHost(raw.to_string()))?;

    if is_private_host(host) {
        return Err(EndpointAdmissionError::PrivateAddress(raw.to_string()));
    }

    Ok(url)
}

fn is_private_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    // IPv6 主机在URL中带方括号
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => is_private_ipv4(ip),
        Ok(IpAddr::V6(ip)) => is_private_ipv6(ip),
        Err(_) => false,
    }
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        // 100.64.0.0/10 运营商级NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // 0.0.0.0/8
        || octets[0] == 0
}

fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(v4);
    }
    let segments = ip.segments();
    let embedded_v4 = || {
        Ipv4Addr::new(
            (segments[6] >> 8) as u8,
            segments[6] as u8,
            (segments[7] >> 8) as u8,
            segments[7] as u8,
        )
    };
    // ::a.b.c.d 兼容地址（::与::1除外）
    if segments[..6] == [0; 6] && !ip.is_unspecified() && !ip.is_loopback() {
        return is_private_ipv4(embedded_v4());
    }
    // 64:ff9b::/96 NAT64
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        return is_private_ipv4(embedded_v4());
    }
    let first = segments[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 唯一本地地址
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 链路本地地址
        || (first & 0xffc0) == 0xfe80
}

fn default_max_requests_per_window() -> u32 {
    100
}

fn default_window_seconds() -> u64 {
    60
}

fn default_health_check_interval() -> u64 {
    60
}

fn default_health_check_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_canary_method() -> String {
    "getSlot".to_string()
}

fn default_outcome_history_size() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_inter_attempt_delay() -> u64 {
    2000
}

fn default_inter_attempt_delay_cap() -> u64 {
    10_000
}

fn default_rate_limit_backoff() -> u64 {
    5000
}

fn default_rate_limit_backoff_cap() -> u64 {
    30_000
}

fn default_failure_delay() -> u64 {
    1000
}

fn default_empty_pool_delay() -> u64 {
    1000
}

fn default_bind_address() -> String {
    "127.0.0.1:8899".to_string()
}

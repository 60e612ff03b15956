use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 上游错误分类
///
/// 由HTTP调用层显式设置，调度器据此决定退避时长与熔断动作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// HTTP 429 / Too Many Requests
    RateLimited,
    /// HTTP 403
    Forbidden,
    /// 超时、连接重置、DNS失败等网络层故障
    TransientNetwork,
    /// 其他上游错误（解码失败、JSON-RPC错误等）
    Other,
}

impl ErrorClass {
    /// 基于错误文本的兼容分类
    ///
    /// 仅用于无法提供类型化错误的调用方；"429"/"Too Many Requests" 视为限流，
    /// "403"/"Forbidden" 视为拒绝访问，其余一律视为网络瞬时故障。
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("too many requests") {
            ErrorClass::RateLimited
        } else if lower.contains("403") || lower.contains("forbidden") {
            ErrorClass::Forbidden
        } else {
            ErrorClass::TransientNetwork
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Forbidden => "forbidden",
            ErrorClass::TransientNetwork => "transient_network",
            ErrorClass::Other => "other",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次上游调用的失败
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{class}: {message}")]
pub struct UpstreamError {
    pub class: ErrorClass,
    pub message: String,
}

impl UpstreamError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::RateLimited, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Forbidden, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::TransientNetwork, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Other, message)
    }

    /// 从纯文本错误构造，分类规则见 [`ErrorClass::from_message`]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorClass::from_message(&message), message)
    }

    /// 根据HTTP状态码分类
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", truncate(body, 256))
        };

        let class = match status {
            StatusCode::TOO_MANY_REQUESTS => ErrorClass::RateLimited,
            StatusCode::FORBIDDEN => ErrorClass::Forbidden,
            StatusCode::REQUEST_TIMEOUT => ErrorClass::TransientNetwork,
            s if s.is_server_error() => ErrorClass::TransientNetwork,
            _ => ErrorClass::Other,
        };

        Self::new(class, message)
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status, "");
        }
        if err.is_decode() {
            return Self::other(format!("failed to decode response: {err}"));
        }
        // timeout / connect / request / body 均属网络层故障
        Self::transient(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

//! Error types for balance lookups.

use thiserror::Error;

/// Errors that can occur while looking up an account balance.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Account id is empty")]
    EmptyAccount,

    #[error("Lookup timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("No billing record found for account")]
    NotFound,

    #[error("Upstream error (code {code}): {message}")]
    Upstream { code: i64, message: String },
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QueryError::Timeout
        } else if err.is_decode() {
            QueryError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            QueryError::Upstream {
                code: i64::from(status.as_u16()),
                message: err.to_string(),
            }
        } else {
            QueryError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Malformed(err.to_string())
    }
}

impl QueryError {
    /// Returns true if the same lookup could plausibly succeed on the next sweep.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueryError::Timeout | QueryError::Transport(_) | QueryError::Upstream { .. }
        )
    }

    /// Message shown to a user who asked for their balance.
    pub fn user_message(&self) -> String {
        match self {
            QueryError::EmptyAccount => "openID不能为空".to_string(),
            QueryError::Timeout => "请求API超时".to_string(),
            QueryError::Transport(e) => format!("请求API失败: {e}"),
            QueryError::Malformed(_) => "API响应格式错误".to_string(),
            QueryError::NotFound => "未找到电费信息".to_string(),
            QueryError::Upstream { message, .. } if !message.is_empty() => message.clone(),
            QueryError::Upstream { .. } => "查询失败，未知错误".to_string(),
        }
    }
}

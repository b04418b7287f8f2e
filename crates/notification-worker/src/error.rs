//! 通知服务错误类型

use casino_shared::error::CasinoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("通知发送失败: 渠道={channel}, 原因={reason}")]
    SendFailed { channel: String, reason: String },

    #[error("渠道请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("通知反序列化失败: {0}")]
    DeserializationFailed(String),

    #[error("渠道配置无效: {0}")]
    Config(String),

    #[error(transparent)]
    Shared(#[from] CasinoError),
}

impl NotificationError {
    /// 超时与连接失败可以重试，渠道明确拒绝的请求不重试
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }
}

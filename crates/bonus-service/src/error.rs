//! 奖金服务错误类型
//!
//! 定义服务层的业务错误和系统错误

use casino_shared::error::CasinoError;
use rule_engine::RuleError;
use rust_decimal::Decimal;
use thiserror::Error;

/// 奖金服务错误类型
#[derive(Debug, Error)]
pub enum BonusError {
    // === 活动相关错误 ===
    #[error("活动不存在: {0}")]
    CampaignNotFound(i64),

    #[error("活动配置无效: campaign_id={campaign_id}, {reason}")]
    InvalidCampaign { campaign_id: i64, reason: String },

    // === 钱包相关错误 ===
    #[error("金额无效: {0}")]
    InvalidAmount(String),

    #[error("余额不足: bucket={bucket}, 需要 {required}, 可用 {available}")]
    InsufficientBalance {
        bucket: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("交易不存在: reference={reference}")]
    TransactionNotFound { reference: String },

    // === 规则相关错误 ===
    #[error("规则评估失败: {0}")]
    RuleEvaluation(#[from] RuleError),

    // === 系统错误 ===
    #[error(transparent)]
    Shared(#[from] CasinoError),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 奖金服务 Result 类型别名
pub type Result<T> = std::result::Result<T, BonusError>;

impl BonusError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) => true,
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 检查是否为业务错误（非系统错误）
    ///
    /// 业务错误只影响单个活动，记录到事件结果中即可
    pub fn is_business_error(&self) -> bool {
        match self {
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) => false,
            Self::Shared(e) => !e.is_retryable() && !matches!(e, CasinoError::Internal(_)),
            _ => true,
        }
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CampaignNotFound(_) => "CAMPAIGN_NOT_FOUND",
            Self::InvalidCampaign { .. } => "INVALID_CAMPAIGN",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            Self::RuleEvaluation(_) => "RULE_EVALUATION_FAILED",
            Self::Shared(e) => e.code(),
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// 跨越 `EventProcessor` 边界时转换为共享错误，保留可重试语义
impl From<BonusError> for CasinoError {
    fn from(err: BonusError) -> Self {
        match err {
            BonusError::Shared(e) => e,
            BonusError::Database(e) => CasinoError::Database(e),
            BonusError::Serialization(e) => CasinoError::Serialization(e),
            BonusError::CampaignNotFound(id) => CasinoError::NotFound {
                entity: "Campaign".to_string(),
                id: id.to_string(),
            },
            BonusError::InsufficientBalance {
                bucket,
                required,
                available,
            } => CasinoError::InsufficientBalance {
                bucket,
                required: required.to_string(),
                available: available.to_string(),
            },
            BonusError::TransactionNotFound { reference } => CasinoError::NotFound {
                entity: "WalletTransaction".to_string(),
                id: reference,
            },
            BonusError::RuleEvaluation(e) => CasinoError::RuleExecutionFailed(e.to_string()),
            BonusError::InvalidAmount(msg) | BonusError::Validation(msg) => {
                CasinoError::Validation(msg)
            }
            other @ BonusError::InvalidCampaign { .. } => CasinoError::Validation(other.to_string()),
            BonusError::Internal(msg) => CasinoError::Internal(msg),
        }
    }
}

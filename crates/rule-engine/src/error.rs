//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("无效的操作符: {operator} 不支持类型 {value_type}")]
    InvalidOperator {
        operator: String,
        value_type: String,
    },

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("条件 {condition} 评估失败: {source}")]
    ConditionFailed {
        condition: String,
        #[source]
        source: Box<RuleError>,
    },

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;

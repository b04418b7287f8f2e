//! 活动规则引擎
//!
//! 按 `(scope, field, op, value)` 条件评估事件上下文，判断活动的参与资格
//! 与分阶段释放条件是否满足：
//! - JSON 规则定义（`RuleSet`）
//! - 分域评估上下文（event / user / wallet / usage）
//! - 短路求值执行，可选评估追踪

pub mod error;
pub mod evaluator;
pub mod executor;
pub mod models;
pub mod operators;

pub use error::{Result, RuleError};
pub use evaluator::ConditionEvaluator;
pub use executor::RuleExecutor;
pub use models::{Condition, ConditionScope, EvaluationContext, EvaluationResult, RuleSet};
pub use operators::{LogicalOperator, Operator};

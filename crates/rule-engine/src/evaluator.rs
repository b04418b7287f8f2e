//! 条件评估器
//!
//! 实现各操作符的评估逻辑。金额常以字符串形式出现在事件中（如 `"100.00"`），
//! 数值与数字字符串统一按数值比较。

use crate::error::{Result, RuleError};
use crate::models::type_name;
use crate::operators::Operator;
use serde_json::Value;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件
    ///
    /// * `field_value` - 从上下文中获取的字段值，`None` 表示字段不存在
    /// * `operator` - 操作符
    /// * `expected_value` - 规则中定义的期望值
    ///
    /// 字段不存在时所有操作符都返回 false，包括 `neq` 和 `nin`。
    pub fn evaluate(
        field_value: Option<&Value>,
        operator: Operator,
        expected_value: &Value,
    ) -> Result<bool> {
        let Some(field_value) = field_value else {
            return Ok(false);
        };

        match operator {
            Operator::Eq => Ok(Self::eq(field_value, expected_value)),
            Operator::Neq => Ok(!Self::eq(field_value, expected_value)),
            Operator::Gt => Self::compare(field_value, expected_value, |a, b| a > b),
            Operator::Gte => Self::compare(field_value, expected_value, |a, b| a >= b),
            Operator::Lt => Self::compare(field_value, expected_value, |a, b| a < b),
            Operator::Lte => Self::compare(field_value, expected_value, |a, b| a <= b),
            Operator::In => Self::in_list(field_value, expected_value),
            Operator::Nin => Self::in_list(field_value, expected_value).map(|r| !r),
        }
    }

    fn eq(field: &Value, expected: &Value) -> bool {
        // 100 == 100.0 == "100.00"
        if let (Some(f1), Some(f2)) = (Self::as_f64(field), Self::as_f64(expected)) {
            return (f1 - f2).abs() < f64::EPSILON;
        }

        field == expected
    }

    fn compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(f64, f64) -> bool,
    {
        let field_num = Self::as_f64(field).ok_or_else(|| RuleError::TypeMismatch {
            expected: "number".to_string(),
            actual: type_name(field).to_string(),
        })?;

        let expected_num = Self::as_f64(expected).ok_or_else(|| RuleError::TypeMismatch {
            expected: "number".to_string(),
            actual: type_name(expected).to_string(),
        })?;

        Ok(cmp(field_num, expected_num))
    }

    fn in_list(field: &Value, expected: &Value) -> Result<bool> {
        let arr = expected.as_array().ok_or_else(|| RuleError::TypeMismatch {
            expected: "array".to_string(),
            actual: type_name(expected).to_string(),
        })?;

        Ok(arr.iter().any(|item| Self::eq(field, item)))
    }

    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

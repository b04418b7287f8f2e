//! 规则引擎领域模型

use crate::error::{Result, RuleError};
use crate::operators::{LogicalOperator, Operator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 条件取值的数据域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionScope {
    /// 事件信封与业务数据
    Event,
    /// 玩家资料快照
    User,
    /// 钱包余额
    Wallet,
    /// 当前活动的使用进度
    Usage,
}

impl ConditionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::User => "user",
            Self::Wallet => "wallet",
            Self::Usage => "usage",
        }
    }
}

impl fmt::Display for ConditionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个条件
///
/// `field` 支持点号路径，如 `meta.game.provider`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub scope: ConditionScope,
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(
        scope: ConditionScope,
        field: impl Into<String>,
        op: Operator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            scope,
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// 可读描述，用于匹配记录和日志
    pub fn label(&self) -> String {
        format!("{}.{} {} {}", self.scope, self.field, self.op, self.value)
    }

    /// 检查期望值与操作符是否匹配
    pub fn validate(&self) -> Result<()> {
        if self.field.trim().is_empty() {
            return Err(RuleError::ParseError("条件字段不能为空".to_string()));
        }

        if self.op.is_membership() && !self.value.is_array() {
            return Err(RuleError::InvalidOperator {
                operator: self.op.to_string(),
                value_type: type_name(&self.value).to_string(),
            });
        }

        if self.op.is_numeric() && !is_numeric_like(&self.value) {
            return Err(RuleError::InvalidOperator {
                operator: self.op.to_string(),
                value_type: type_name(&self.value).to_string(),
            });
        }

        Ok(())
    }
}

/// 条件集合
///
/// 空集合视为恒真，活动未配置资格条件时对所有人开放
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl RuleSet {
    pub fn new(operator: LogicalOperator, conditions: Vec<Condition>) -> Self {
        Self {
            operator,
            conditions,
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Self::new(LogicalOperator::And, conditions)
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self::new(LogicalOperator::Or, conditions)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let rule_set: Self = serde_json::from_str(json)?;
        rule_set.validate()?;
        Ok(rule_set)
    }

    pub fn validate(&self) -> Result<()> {
        self.conditions.iter().try_for_each(Condition::validate)
    }
}

/// 评估上下文
///
/// 顶层为按数据域划分的 JSON 对象：`{"event": {...}, "user": {...}, ...}`
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    data: Value,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self {
            data: Value::Object(Map::new()),
        }
    }
}

impl EvaluationContext {
    /// 非对象输入会被替换为空对象
    pub fn new(data: Value) -> Self {
        match data {
            Value::Object(_) => Self { data },
            _ => Self::default(),
        }
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let data: Value = serde_json::from_str(json)?;
        Ok(Self::new(data))
    }

    pub fn with_scope(mut self, scope: ConditionScope, value: Value) -> Self {
        self.set_scope(scope, value);
        self
    }

    /// 替换整个数据域
    pub fn set_scope(&mut self, scope: ConditionScope, value: Value) {
        if let Value::Object(map) = &mut self.data {
            map.insert(scope.as_str().to_string(), value);
        }
    }

    pub fn scope(&self, scope: ConditionScope) -> Option<&Value> {
        self.data.get(scope.as_str())
    }

    /// 读取指定数据域中的字段，`null` 视为不存在
    pub fn get(&self, scope: ConditionScope, field: &str) -> Option<&Value> {
        let root = self.scope(scope)?;
        lookup_path(root, field).filter(|v| !v.is_null())
    }

    /// 按完整路径读取，如 `event.amount` 或 `user.tags.0`
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.data, path).filter(|v| !v.is_null())
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}

fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;

    for part in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_numeric_like(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

/// 评估结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationResult {
    pub matched: bool,
    pub matched_conditions: Vec<String>,
    pub evaluation_trace: Vec<String>,
    pub evaluation_time_us: u64,
}

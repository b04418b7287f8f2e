//! 规则执行器
//!
//! 对 `RuleSet` 做短路求值，返回匹配结果和评估追踪信息。

use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::models::{Condition, EvaluationContext, EvaluationResult, RuleSet};
use crate::operators::LogicalOperator;
use std::time::Instant;

/// 规则执行器
pub struct RuleExecutor {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    /// 执行规则评估
    ///
    /// 空规则集直接匹配。条件评估出错时返回 `ConditionFailed`，由调用方决定按不匹配处理。
    pub fn execute(&self, rule_set: &RuleSet, context: &EvaluationContext) -> Result<EvaluationResult> {
        let start = Instant::now();
        let mut result = EvaluationResult::default();

        result.matched = if rule_set.is_empty() {
            if self.trace_enabled {
                result.evaluation_trace.push("空规则集，直接匹配".to_string());
            }
            true
        } else {
            self.evaluate_group(rule_set, context, &mut result)?
        };

        result.evaluation_time_us = start.elapsed().as_micros() as u64;
        Ok(result)
    }

    /// 便捷方法，只关心是否匹配
    pub fn matches(&self, rule_set: &RuleSet, context: &EvaluationContext) -> Result<bool> {
        self.execute(rule_set, context).map(|r| r.matched)
    }

    fn evaluate_group(
        &self,
        rule_set: &RuleSet,
        context: &EvaluationContext,
        result: &mut EvaluationResult,
    ) -> Result<bool> {
        if self.trace_enabled {
            result.evaluation_trace.push(format!(
                "开始评估 {} 组 (共 {} 个条件)",
                rule_set.operator,
                rule_set.conditions.len()
            ));
        }

        match rule_set.operator {
            LogicalOperator::And => {
                for (i, cond) in rule_set.conditions.iter().enumerate() {
                    if !self.evaluate_condition(cond, context, result, i)? {
                        if self.trace_enabled {
                            result
                                .evaluation_trace
                                .push(format!("AND 短路 - 条件 {} 不匹配", i));
                        }
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            LogicalOperator::Or => {
                for (i, cond) in rule_set.conditions.iter().enumerate() {
                    if self.evaluate_condition(cond, context, result, i)? {
                        if self.trace_enabled {
                            result
                                .evaluation_trace
                                .push(format!("OR 短路 - 条件 {} 匹配", i));
                        }
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn evaluate_condition(
        &self,
        cond: &Condition,
        context: &EvaluationContext,
        result: &mut EvaluationResult,
        index: usize,
    ) -> Result<bool> {
        let field_value = context.get(cond.scope, &cond.field);

        let matched = ConditionEvaluator::evaluate(field_value, cond.op, &cond.value).map_err(
            |e| RuleError::ConditionFailed {
                condition: cond.label(),
                source: Box::new(e),
            },
        )?;

        if self.trace_enabled {
            result.evaluation_trace.push(format!(
                "[{}] {} (实际值 {}) => {}",
                index,
                cond.label(),
                field_value.map_or_else(|| "<missing>".to_string(), |v| v.to_string()),
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            ));
        }

        if matched {
            result.matched_conditions.push(cond.label());
        }

        Ok(matched)
    }
}

impl Default for RuleExecutor {
    fn default() -> Self {
        Self::new()
    }
}

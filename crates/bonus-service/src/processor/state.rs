//! 单个事件的处理状态
//!
//! 处理器链共享同一个状态：用户活动记录在内存中修改，全部处理完成后由引擎一次性保存。

use casino_shared::events::{BonusMovement, EventPayload, EventResult};
use chrono::{DateTime, Utc};
use rule_engine::EvaluationContext;
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::{BonusError, Result};
use crate::models::UserCampaignUsage;

pub struct ProcessingState {
    pub event: EventPayload,
    /// 以事件时间为准，重放时判定结果不变
    pub now: DateTime<Utc>,
    pub user_usage: UserCampaignUsage,
    pub context: EvaluationContext,
    pub result: EventResult,
    /// 用户活动记录有修改，需要保存
    pub dirty: bool,
}

impl ProcessingState {
    pub fn new(event: EventPayload, user_usage: UserCampaignUsage, context: EvaluationContext) -> Self {
        let now = event.timestamp;
        let result = EventResult::new(event.event_id.clone());
        Self {
            event,
            now,
            user_usage,
            context,
            result,
            dirty: false,
        }
    }

    pub fn event_amount(&self) -> Option<Decimal> {
        self.event.decimal_field("amount")
    }

    pub fn push_movement(&mut self, movement: BonusMovement) {
        self.result.bonus_movements.push(movement);
    }

    /// 单个活动处理失败
    ///
    /// 业务错误记录到结果中继续处理其他活动；可重试错误向上返回，整个事件重试
    pub fn record_failure(&mut self, campaign_id: i64, err: BonusError) -> Result<()> {
        if !err.is_business_error() {
            return Err(err);
        }

        warn!(
            event_id = %self.event.event_id,
            campaign_id,
            error_code = err.error_code(),
            error = %err,
            "活动处理失败，继续处理其他活动"
        );
        self.result
            .errors
            .push(format!("campaign {campaign_id}: [{}] {err}", err.error_code()));
        Ok(())
    }
}

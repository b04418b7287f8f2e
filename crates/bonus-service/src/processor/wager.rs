//! 流水累计与退款冲减

use async_trait::async_trait;
use casino_shared::events::EventType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use super::{ProcessingState, RuleProcessor};
use crate::error::{BonusError, Result};

/// BET 事件的下注额计入所有进行中活动的流水
pub struct WagerProcessor;

#[async_trait]
impl RuleProcessor for WagerProcessor {
    fn name(&self) -> &'static str {
        "wager"
    }

    fn handles(&self, event_type: EventType) -> bool {
        event_type == EventType::Bet
    }

    async fn process(&self, state: &mut ProcessingState) -> Result<()> {
        let Some(amount) = state.event_amount().filter(|a| *a > Decimal::ZERO) else {
            debug!(event_id = %state.event.event_id, "下注事件缺少有效金额，不计流水");
            return Ok(());
        };

        let now = state.now;
        let mut overflowed = Vec::new();
        for usage in state.user_usage.campaigns.values_mut().filter(|u| u.is_active()) {
            match usage.wagered.checked_add(amount) {
                Some(wagered) => {
                    usage.wagered = wagered;
                    usage.updated_at = now;
                    state.dirty = true;
                }
                None => overflowed.push((usage.campaign_id, usage.wagered)),
            }
        }

        for (campaign_id, wagered) in overflowed {
            state.record_failure(
                campaign_id,
                BonusError::InvalidAmount(format!("流水累计溢出: {wagered} + {amount}")),
            )?;
        }
        Ok(())
    }
}

/// REFUND 事件冲减流水，不低于零
///
/// 只冲减发放时间不晚于原下注时间（`original_bet_at`）的活动，发放前的下注本就不计流水。
/// 事件不带原下注时间时冲减全部进行中的活动。已释放的阶段不回滚。
pub struct RefundProcessor;

impl RefundProcessor {
    fn original_bet_at(state: &ProcessingState) -> Option<DateTime<Utc>> {
        state
            .event
            .str_field("original_bet_at")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

#[async_trait]
impl RuleProcessor for RefundProcessor {
    fn name(&self) -> &'static str {
        "refund"
    }

    fn handles(&self, event_type: EventType) -> bool {
        event_type == EventType::Refund
    }

    async fn process(&self, state: &mut ProcessingState) -> Result<()> {
        let Some(amount) = state.event_amount().filter(|a| *a > Decimal::ZERO) else {
            debug!(event_id = %state.event.event_id, "退款事件缺少有效金额，不冲减流水");
            return Ok(());
        };
        let bet_at = Self::original_bet_at(state);

        let now = state.now;
        for usage in state.user_usage.campaigns.values_mut().filter(|u| u.is_active()) {
            let counted = match (bet_at, usage.credited_at) {
                (Some(bet_at), Some(credited_at)) => credited_at <= bet_at,
                _ => true,
            };
            if !counted {
                debug!(campaign_id = usage.campaign_id, "原下注早于奖金发放，不冲减");
                continue;
            }
            usage.wagered = (usage.wagered - amount).max(Decimal::ZERO);
            usage.updated_at = now;
            state.dirty = true;
        }
        Ok(())
    }
}

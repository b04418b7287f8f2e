//! 奖金释放服务
//!
//! 按阶段将锁定奖金转为可用奖金，或在提现、过期时没收剩余锁定奖金。
//!
//! ## 释放规则
//!
//! - 阶段严格按序号升序释放，前一阶段未满足时后续阶段不评估
//! - 每释放一个阶段刷新 `usage` 数据域，一个事件可以连续满足多个阶段
//! - 最后一个阶段释放全部剩余锁定奖金

use std::sync::Arc;

use casino_shared::events::{BonusMovement, EventPayload, MovementKind};
use chrono::{DateTime, Utc};
use rule_engine::{ConditionScope, EvaluationContext, RuleExecutor};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use super::bonus_service::{apply_idempotent, percent_of, record_movement_metric, round_amount};
use crate::error::Result;
use crate::models::{
    AmountType, BonusReleaseType, BonusTransactionKey, Campaign, CampaignUsage, ForfeitReason,
    NewBonusTransaction, ReleaseStage, UsageStatus,
};
use crate::repository::{BonusLedgerOutcome, BonusLedgerRepositoryTrait};

pub struct BonusReleaseService {
    ledger_repo: Arc<dyn BonusLedgerRepositoryTrait>,
    executor: RuleExecutor,
}

impl BonusReleaseService {
    pub fn new(ledger_repo: Arc<dyn BonusLedgerRepositoryTrait>) -> Self {
        Self {
            ledger_repo,
            executor: RuleExecutor::new(),
        }
    }

    /// 计算阶段释放金额
    ///
    /// PERCENTAGE 以本轮锁定奖金总额为基数，结果不超过剩余锁定奖金
    pub fn compute_release_amount(
        stage: &ReleaseStage,
        usage: &CampaignUsage,
        is_last: bool,
    ) -> Result<Decimal> {
        let remaining = usage.remaining_locked();
        if is_last {
            return Ok(remaining);
        }

        let config = &stage.release;
        let raw = match config.amount_type {
            AmountType::Percentage => percent_of(usage.locked_amount, config.value)?,
            AmountType::Fixed => config.value,
        };
        let capped = match config.max_amount {
            Some(max) => raw.min(max),
            None => raw,
        };

        Ok(round_amount(capped.min(remaining)).max(Decimal::ZERO))
    }

    /// 推进释放进度，返回本次落账的资金变动
    #[instrument(skip_all, fields(campaign_id = campaign.id, user_id = %event.user_id, event_id = %event.event_id))]
    pub async fn advance(
        &self,
        campaign: &Campaign,
        usage: &mut CampaignUsage,
        context: &mut EvaluationContext,
        event: &EventPayload,
        now: DateTime<Utc>,
    ) -> Result<Vec<BonusMovement>> {
        let mut movements = Vec::new();
        if !usage.is_active() {
            return Ok(movements);
        }

        let last_stage = campaign.last_stage();

        for stage in campaign.sorted_stages() {
            if usage.is_stage_released(stage.stage) {
                continue;
            }
            if stage.trigger_event != event.event_type {
                break;
            }

            context.set_scope(ConditionScope::Usage, usage.to_context_value());
            let matched = match self.executor.execute(&stage.rules, context) {
                Ok(result) => result.matched,
                Err(e) => {
                    warn!(stage = stage.stage, error = %e, "释放条件评估出错，按不满足处理");
                    false
                }
            };
            casino_shared::observability::metrics::record_rule_evaluation("release", matched);
            if !matched {
                debug!(stage = stage.stage, "释放条件未满足");
                break;
            }

            let is_last = last_stage == Some(stage.stage);
            let amount = Self::compute_release_amount(stage, usage, is_last)?;

            let mut released = amount;
            let mut newly_applied = false;
            if amount > Decimal::ZERO {
                let movement = NewBonusTransaction {
                    key: BonusTransactionKey::stage(
                        &event.user_id,
                        campaign.id,
                        usage.usage_seq,
                        stage.stage,
                    ),
                    amount,
                    source_event_id: event.event_id.clone(),
                    reason: None,
                };
                match apply_idempotent(self.ledger_repo.as_ref(), &movement).await? {
                    BonusLedgerOutcome::Applied(_) => newly_applied = true,
                    BonusLedgerOutcome::Duplicate(existing) => {
                        info!(stage = stage.stage, "阶段此前已释放，同步进度");
                        released = existing.amount;
                    }
                }
            }

            usage.record_release(stage.stage, released, &event.event_id, now);

            let completed = campaign
                .release_schedule
                .iter()
                .all(|s| usage.is_stage_released(s.stage));
            if completed {
                usage.close(UsageStatus::Completed, &event.event_id, now);
            }

            if newly_applied {
                record_movement_metric(MovementKind::StageRelease, released);
                info!(stage = stage.stage, amount = %released, completed, "阶段奖金已释放");
                movements.push(BonusMovement {
                    campaign_id: campaign.id,
                    campaign_name: campaign.name.clone(),
                    kind: MovementKind::StageRelease,
                    stage: Some(stage.stage),
                    amount: released,
                    campaign_completed: completed,
                });
            }

            if completed {
                break;
            }
        }

        context.set_scope(ConditionScope::Usage, usage.to_context_value());
        Ok(movements)
    }

    /// 没收剩余锁定奖金并结束本轮
    ///
    /// 提现没收记为 FORFEITED，有效期到期记为 EXPIRED
    #[instrument(skip_all, fields(campaign_id = campaign.id, %user_id, reason = reason.as_str()))]
    pub async fn forfeit(
        &self,
        campaign: &Campaign,
        usage: &mut CampaignUsage,
        user_id: &str,
        reason: ForfeitReason,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BonusMovement>> {
        if !usage.is_active() {
            return Ok(None);
        }

        let (status, kind) = match reason {
            ForfeitReason::Withdrawal => (UsageStatus::Forfeited, MovementKind::Forfeit),
            ForfeitReason::Expired => (UsageStatus::Expired, MovementKind::Expire),
        };

        let remaining = usage.remaining_locked();
        let mut movement = None;

        if remaining > Decimal::ZERO {
            let new_tx = NewBonusTransaction {
                key: BonusTransactionKey::new(
                    user_id,
                    campaign.id,
                    BonusReleaseType::Forfeit,
                    usage.usage_seq,
                ),
                amount: remaining,
                source_event_id: event_id.to_string(),
                reason: Some(reason.as_str().to_string()),
            };

            if let BonusLedgerOutcome::Applied(_) =
                apply_idempotent(self.ledger_repo.as_ref(), &new_tx).await?
            {
                record_movement_metric(kind, remaining);
                info!(amount = %remaining, "剩余锁定奖金已没收");
                movement = Some(BonusMovement {
                    campaign_id: campaign.id,
                    campaign_name: campaign.name.clone(),
                    kind,
                    stage: None,
                    amount: remaining,
                    campaign_completed: false,
                });
            }
        }

        usage.close(status, event_id, now);
        Ok(movement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BonusError;
    use crate::models::BonusTransaction;
    use crate::models::campaign::fixtures::locked_deposit_campaign;
    use crate::models::AmountConfig;
    use crate::repository::MockBonusLedgerRepositoryTrait;
    use casino_shared::events::EventType;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn bonus_tx(key: &BonusTransactionKey, amount: Decimal) -> BonusTransaction {
        BonusTransaction {
            id: 1,
            user_id: key.user_id.clone(),
            campaign_id: key.campaign_id,
            release_type: key.release_type,
            usage_seq: key.usage_seq,
            stage: key.stage,
            amount,
            source_event_id: "evt".to_string(),
            reason: None,
            created_at: Utc::now(),
        }
    }

    fn applying_ledger() -> MockBonusLedgerRepositoryTrait {
        let mut ledger = MockBonusLedgerRepositoryTrait::new();
        ledger.expect_find_bonus_transaction().returning(|_| Ok(None));
        ledger
            .expect_apply_bonus_movement()
            .returning(|m| Ok(BonusLedgerOutcome::Applied(bonus_tx(&m.key, m.amount))));
        ledger
    }

    fn active_usage(campaign: &Campaign, locked: Decimal, wagered: Decimal) -> CampaignUsage {
        let now = Utc::now();
        let mut usage = CampaignUsage::new(campaign.id, now);
        usage.start_new_cycle(campaign, locked, vec![], "evt-credit", now);
        usage.wagered = wagered;
        usage
    }

    fn bet_event() -> EventPayload {
        EventPayload::new(EventType::Bet, "u-1", json!({"amount": "100"}), "wallet")
    }

    #[test]
    fn test_compute_release_amount() {
        let campaign = locked_deposit_campaign(1);
        let stages = campaign.sorted_stages();
        let mut usage = active_usage(&campaign, dec!(99.99), Decimal::ZERO);

        // 50% of 99.99 = 49.995 -> 49.99
        assert_eq!(
            BonusReleaseService::compute_release_amount(stages[0], &usage, false).unwrap(),
            dec!(49.99)
        );

        usage.record_release(1, dec!(49.99), "evt", Utc::now());
        assert_eq!(
            BonusReleaseService::compute_release_amount(stages[1], &usage, true).unwrap(),
            dec!(50.00)
        );
    }

    #[test]
    fn test_release_amount_capped_by_remaining_and_max() {
        let mut stage = locked_deposit_campaign(1).release_schedule.0[0].clone();
        stage.release = AmountConfig::fixed(dec!(80)).with_max(dec!(60));

        let campaign = locked_deposit_campaign(1);
        let mut usage = active_usage(&campaign, dec!(100), Decimal::ZERO);
        assert_eq!(
            BonusReleaseService::compute_release_amount(&stage, &usage, false).unwrap(),
            dec!(60)
        );

        usage.released_amount = dec!(70);
        assert_eq!(
            BonusReleaseService::compute_release_amount(&stage, &usage, false).unwrap(),
            dec!(30)
        );
    }

    #[test]
    fn test_release_percentage_overflow_is_invalid_amount() {
        let mut stage = locked_deposit_campaign(1).release_schedule.0[0].clone();
        stage.release = AmountConfig::percentage(Decimal::MAX);

        let campaign = locked_deposit_campaign(1);
        let usage = active_usage(&campaign, dec!(1000), Decimal::ZERO);
        let err = BonusReleaseService::compute_release_amount(&stage, &usage, false).unwrap_err();
        assert!(matches!(err, BonusError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn test_advance_releases_multiple_stages_in_one_event() {
        let campaign = locked_deposit_campaign(1);
        let mut usage = active_usage(&campaign, dec!(100), dec!(1200));
        let event = bet_event();
        let mut ctx = EvaluationContext::new(event.to_evaluation_context());

        let service = BonusReleaseService::new(Arc::new(applying_ledger()));
        let movements = service
            .advance(&campaign, &mut usage, &mut ctx, &event, Utc::now())
            .await
            .unwrap();

        assert_eq!(movements.len(), 2);
        assert_eq!(movements[0].stage, Some(1));
        assert_eq!(movements[0].amount, dec!(50));
        assert!(!movements[0].campaign_completed);
        assert_eq!(movements[1].amount, dec!(50));
        assert!(movements[1].campaign_completed);
        assert_eq!(usage.status, UsageStatus::Completed);
        assert_eq!(usage.remaining_locked(), Decimal::ZERO);
        assert_eq!(
            ctx.get(ConditionScope::Usage, "stages_released"),
            Some(&json!(2))
        );
    }

    #[tokio::test]
    async fn test_advance_stops_at_first_unmet_stage() {
        let campaign = locked_deposit_campaign(1);
        let mut usage = active_usage(&campaign, dec!(100), dec!(600));
        let event = bet_event();
        let mut ctx = EvaluationContext::new(event.to_evaluation_context());

        let service = BonusReleaseService::new(Arc::new(applying_ledger()));
        let movements = service
            .advance(&campaign, &mut usage, &mut ctx, &event, Utc::now())
            .await
            .unwrap();

        assert_eq!(movements.len(), 1);
        assert_eq!(usage.released_stages, vec![1]);
        assert!(usage.is_active());
    }

    #[tokio::test]
    async fn test_advance_never_skips_stages() {
        // 阶段 1 要求 WIN 事件，BET 事件不能越过它释放阶段 2
        let mut campaign = locked_deposit_campaign(1);
        campaign.release_schedule.0[0].trigger_event = EventType::Win;
        let mut usage = active_usage(&campaign, dec!(100), dec!(5000));
        let event = bet_event();
        let mut ctx = EvaluationContext::new(event.to_evaluation_context());

        let mut ledger = MockBonusLedgerRepositoryTrait::new();
        ledger.expect_find_bonus_transaction().never();
        ledger.expect_apply_bonus_movement().never();

        let service = BonusReleaseService::new(Arc::new(ledger));
        let movements = service
            .advance(&campaign, &mut usage, &mut ctx, &event, Utc::now())
            .await
            .unwrap();
        assert!(movements.is_empty());
        assert!(usage.released_stages.is_empty());
    }

    #[tokio::test]
    async fn test_advance_duplicate_stage_syncs_progress_without_movement() {
        let campaign = locked_deposit_campaign(1);
        let mut usage = active_usage(&campaign, dec!(100), dec!(600));
        let event = bet_event();
        let mut ctx = EvaluationContext::new(event.to_evaluation_context());

        let mut ledger = MockBonusLedgerRepositoryTrait::new();
        ledger
            .expect_find_bonus_transaction()
            .returning(|key| Ok(Some(bonus_tx(key, dec!(50)))));
        ledger.expect_apply_bonus_movement().never();

        let service = BonusReleaseService::new(Arc::new(ledger));
        let movements = service
            .advance(&campaign, &mut usage, &mut ctx, &event, Utc::now())
            .await
            .unwrap();

        assert!(movements.is_empty());
        assert_eq!(usage.released_stages, vec![1]);
        assert_eq!(usage.released_amount, dec!(50));
    }

    #[tokio::test]
    async fn test_advance_ledger_error_propagates() {
        let campaign = locked_deposit_campaign(1);
        let mut usage = active_usage(&campaign, dec!(100), dec!(600));
        let event = bet_event();
        let mut ctx = EvaluationContext::new(event.to_evaluation_context());

        let mut ledger = MockBonusLedgerRepositoryTrait::new();
        ledger.expect_find_bonus_transaction().returning(|_| Ok(None));
        ledger
            .expect_apply_bonus_movement()
            .returning(|_| Err(BonusError::Database(sqlx::Error::PoolTimedOut)));

        let service = BonusReleaseService::new(Arc::new(ledger));
        let result = service
            .advance(&campaign, &mut usage, &mut ctx, &event, Utc::now())
            .await;
        assert!(result.is_err());
        assert!(usage.released_stages.is_empty());
    }

    #[tokio::test]
    async fn test_forfeit_remaining_locked() {
        let campaign = locked_deposit_campaign(1);
        let mut usage = active_usage(&campaign, dec!(100), Decimal::ZERO);
        usage.record_release(1, dec!(50), "evt", Utc::now());

        let mut ledger = MockBonusLedgerRepositoryTrait::new();
        ledger.expect_find_bonus_transaction().returning(|_| Ok(None));
        ledger
            .expect_apply_bonus_movement()
            .withf(|m| {
                m.key.release_type == BonusReleaseType::Forfeit
                    && m.amount == dec!(50)
                    && m.reason.as_deref() == Some("WITHDRAWAL")
            })
            .times(1)
            .returning(|m| Ok(BonusLedgerOutcome::Applied(bonus_tx(&m.key, m.amount))));

        let service = BonusReleaseService::new(Arc::new(ledger));
        let movement = service
            .forfeit(&campaign, &mut usage, "u-1", ForfeitReason::Withdrawal, "evt-w", Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(movement.kind, MovementKind::Forfeit);
        assert_eq!(movement.amount, dec!(50));
        assert_eq!(usage.status, UsageStatus::Forfeited);
    }

    #[tokio::test]
    async fn test_expire_marks_expired() {
        let campaign = locked_deposit_campaign(1);
        let mut usage = active_usage(&campaign, dec!(100), Decimal::ZERO);

        let service = BonusReleaseService::new(Arc::new(applying_ledger()));
        let movement = service
            .forfeit(&campaign, &mut usage, "u-1", ForfeitReason::Expired, "evt-x", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(movement.kind, MovementKind::Expire);
        assert_eq!(usage.status, UsageStatus::Expired);
    }

    #[tokio::test]
    async fn test_forfeit_inactive_usage_is_noop() {
        let campaign = locked_deposit_campaign(1);
        let mut usage = CampaignUsage::new(1, Utc::now());

        let mut ledger = MockBonusLedgerRepositoryTrait::new();
        ledger.expect_apply_bonus_movement().never();
        let service = BonusReleaseService::new(Arc::new(ledger));
        let movement = service
            .forfeit(&campaign, &mut usage, "u-1", ForfeitReason::Withdrawal, "evt", Utc::now())
            .await
            .unwrap();
        assert!(movement.is_none());
        assert_eq!(usage.status, UsageStatus::Completed);
    }
}

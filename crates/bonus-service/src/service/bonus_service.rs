//! 奖金发放服务
//!
//! 计算奖金金额并落账到锁定或可用奖金。幂等分两层：先按幂等键查询已有流水，
//! 落账时再由唯一约束兜底。

use std::sync::Arc;

use casino_shared::events::{BonusMovement, MovementKind, parse_amount};
use casino_shared::observability::metrics;
use rule_engine::{ConditionScope, EvaluationContext};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{info, instrument};

use crate::error::{BonusError, Result};
use crate::models::{
    AmountConfig, AmountType, BonusKind, BonusReleaseType, BonusTransaction, BonusTransactionKey,
    Campaign, NewBonusTransaction,
};
use crate::repository::{BonusLedgerOutcome, BonusLedgerRepositoryTrait};

/// 发放结果
#[derive(Debug, Clone)]
pub enum CreditOutcome {
    Credited(BonusTransaction),
    /// 本轮奖金此前已落账
    Duplicate(BonusTransaction),
}

impl CreditOutcome {
    pub fn transaction(&self) -> &BonusTransaction {
        match self {
            Self::Credited(tx) | Self::Duplicate(tx) => tx,
        }
    }
}

/// 金额统一向零舍入到分
pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

/// 按比例计算 `base * percent / 100`，溢出时返回 `InvalidAmount`
pub(crate) fn percent_of(base: Decimal, percent: Decimal) -> Result<Decimal> {
    base.checked_mul(percent)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .ok_or_else(|| BonusError::InvalidAmount(format!("金额计算溢出: {base} * {percent}%")))
}

pub(crate) fn movement_label(kind: MovementKind) -> &'static str {
    match kind {
        MovementKind::LockedCredit => "LOCKED_CREDIT",
        MovementKind::UnlockedCredit => "UNLOCKED_CREDIT",
        MovementKind::StageRelease => "STAGE_RELEASE",
        MovementKind::Forfeit => "FORFEIT",
        MovementKind::Expire => "EXPIRE",
    }
}

pub(crate) fn record_movement_metric(kind: MovementKind, amount: Decimal) {
    metrics::record_bonus_movement(movement_label(kind), amount.to_f64().unwrap_or_default());
}

/// 先查后写的幂等落账
pub(crate) async fn apply_idempotent(
    ledger: &dyn BonusLedgerRepositoryTrait,
    movement: &NewBonusTransaction,
) -> Result<BonusLedgerOutcome> {
    if let Some(existing) = ledger.find_bonus_transaction(&movement.key).await? {
        return Ok(BonusLedgerOutcome::Duplicate(existing));
    }
    ledger.apply_bonus_movement(movement).await
}

pub struct BonusService {
    ledger_repo: Arc<dyn BonusLedgerRepositoryTrait>,
}

impl BonusService {
    pub fn new(ledger_repo: Arc<dyn BonusLedgerRepositoryTrait>) -> Self {
        Self { ledger_repo }
    }

    /// 计算发放金额
    ///
    /// PERCENTAGE 以 `event.{base_field}` 为基数；结果按封顶金额截断并向零舍入到分。
    /// 基数缺失、无效或结果不为正时返回 `Ok(None)`，计算溢出返回 `InvalidAmount`。
    pub fn compute_bonus_amount(
        config: &AmountConfig,
        context: &EvaluationContext,
    ) -> Result<Option<Decimal>> {
        let raw = match config.amount_type {
            AmountType::Fixed => config.value,
            AmountType::Percentage => {
                let Some(base) = context
                    .get(ConditionScope::Event, &config.base_field)
                    .and_then(parse_amount)
                else {
                    return Ok(None);
                };
                percent_of(base, config.value)?
            }
        };

        let capped = match config.max_amount {
            Some(max) => raw.min(max),
            None => raw,
        };

        let amount = round_amount(capped);
        Ok((amount > Decimal::ZERO).then_some(amount))
    }

    /// 发放奖金
    ///
    /// 锁定奖金活动记 LOCKED 流水，其余记 UNLOCKED 流水
    #[instrument(skip(self, campaign), fields(campaign_id = campaign.id))]
    pub async fn credit_bonus(
        &self,
        campaign: &Campaign,
        user_id: &str,
        amount: Decimal,
        usage_seq: i32,
        event_id: &str,
    ) -> Result<CreditOutcome> {
        let release_type = match campaign.bonus_kind {
            BonusKind::Locked => BonusReleaseType::Locked,
            BonusKind::Unlocked => BonusReleaseType::Unlocked,
        };

        let movement = NewBonusTransaction {
            key: BonusTransactionKey::new(user_id, campaign.id, release_type, usage_seq),
            amount,
            source_event_id: event_id.to_string(),
            reason: None,
        };

        match apply_idempotent(self.ledger_repo.as_ref(), &movement).await? {
            BonusLedgerOutcome::Applied(tx) => {
                record_movement_metric(Self::credit_kind(campaign), amount);
                info!(%amount, %release_type, usage_seq, "奖金已发放");
                Ok(CreditOutcome::Credited(tx))
            }
            BonusLedgerOutcome::Duplicate(existing) => {
                info!(key = %movement.key, "奖金此前已发放，跳过");
                Ok(CreditOutcome::Duplicate(existing))
            }
        }
    }

    /// 某一轮参与的全部奖金流水，按落账顺序
    pub async fn cycle_history(
        &self,
        user_id: &str,
        campaign_id: i64,
        usage_seq: i32,
    ) -> Result<Vec<BonusTransaction>> {
        self.ledger_repo.list_cycle(user_id, campaign_id, usage_seq).await
    }

    pub fn credit_kind(campaign: &Campaign) -> MovementKind {
        match campaign.bonus_kind {
            BonusKind::Locked => MovementKind::LockedCredit,
            BonusKind::Unlocked => MovementKind::UnlockedCredit,
        }
    }

    /// 发放成功后对外通知的资金变动
    pub fn credit_movement(campaign: &Campaign, amount: Decimal) -> BonusMovement {
        BonusMovement {
            campaign_id: campaign.id,
            campaign_name: campaign.name.clone(),
            kind: Self::credit_kind(campaign),
            stage: None,
            amount,
            campaign_completed: campaign.bonus_kind == BonusKind::Unlocked,
        }
    }
}

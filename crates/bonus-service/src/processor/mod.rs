//! 规则处理器
//!
//! 每种事件按注册顺序经过一组处理器。处理器只修改共享的 `ProcessingState`，
//! 奖金落账通过服务层完成。
//!
//! 默认顺序：过期 -> 流水累计 -> 退款冲减 -> 提现没收 -> 阶段释放 -> 活动触发。
//! 释放在触发之前执行，本事件发放的锁定奖金不会被本事件释放。

mod lifecycle;
mod release;
mod state;
mod trigger;
mod wager;

use std::sync::Arc;

use async_trait::async_trait;
use casino_shared::events::EventType;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::Campaign;
use crate::service::{BonusReleaseService, BonusService, CampaignService};

pub use lifecycle::{ExpiryProcessor, WithdrawalProcessor};
pub use release::ReleaseProcessor;
pub use state::ProcessingState;
pub use trigger::TriggerProcessor;
pub use wager::{RefundProcessor, WagerProcessor};

/// 按事件类型处理的规则策略
#[async_trait]
pub trait RuleProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, event_type: EventType) -> bool;

    async fn process(&self, state: &mut ProcessingState) -> Result<()>;
}

/// 处理器注册表
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: Vec<Box<dyn RuleProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, processor: impl RuleProcessor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// 默认处理器链
    pub fn standard(
        campaigns: Arc<CampaignService>,
        bonus: Arc<BonusService>,
        release: Arc<BonusReleaseService>,
    ) -> Self {
        Self::new()
            .register(ExpiryProcessor::new(campaigns.clone(), release.clone()))
            .register(WagerProcessor)
            .register(RefundProcessor)
            .register(WithdrawalProcessor::new(campaigns.clone(), release.clone()))
            .register(ReleaseProcessor::new(campaigns.clone(), release))
            .register(TriggerProcessor::new(campaigns, bonus))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// 依次执行处理该事件类型的处理器
    pub async fn run(&self, state: &mut ProcessingState) -> Result<()> {
        let event_type = state.event.event_type;
        for processor in self.processors.iter().filter(|p| p.handles(event_type)) {
            debug!(processor = processor.name(), event_id = %state.event.event_id, "执行处理器");
            processor.process(state).await?;
        }
        Ok(())
    }
}

/// 用户进行中的活动及其配置
///
/// 活动配置已不存在时跳过，进度保持不变
pub(crate) async fn active_campaigns(
    campaigns: &CampaignService,
    state: &ProcessingState,
) -> Result<Vec<Campaign>> {
    let mut active = Vec::new();
    for campaign_id in state.user_usage.active_campaign_ids() {
        match campaigns.get_campaign(campaign_id).await? {
            Some(campaign) => active.push(campaign),
            None => warn!(campaign_id, user_id = %state.event.user_id, "进行中的活动已不存在，跳过"),
        }
    }
    Ok(active)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use casino_shared::events::{EventPayload, EventType};
    use chrono::Utc;
    use rule_engine::EvaluationContext;
    use rust_decimal::Decimal;
    use serde_json::Value;

    use super::ProcessingState;
    use crate::models::{BonusTransaction, Campaign, CampaignUsage, UserCampaignUsage};
    use crate::repository::{
        BonusLedgerOutcome, MockBonusLedgerRepositoryTrait, MockCampaignRepositoryTrait,
        MockCampaignUsageStore,
    };
    use crate::service::CampaignService;

    pub fn state_for(event_type: EventType, data: Value, usage: UserCampaignUsage) -> ProcessingState {
        let event = EventPayload::new(event_type, usage.user_id.clone(), data, "test");
        let context = EvaluationContext::new(event.to_evaluation_context());
        ProcessingState::new(event, usage, context)
    }

    pub fn campaign_service(campaigns: Vec<Campaign>) -> Arc<CampaignService> {
        let mut repo = MockCampaignRepositoryTrait::new();
        repo.expect_list_campaigns()
            .returning(move || Ok(campaigns.clone()));
        repo.expect_get_campaign().returning(|_| Ok(None));
        Arc::new(CampaignService::new(
            Arc::new(repo),
            Arc::new(MockCampaignUsageStore::new()),
            300,
        ))
    }

    /// 所有落账请求都成功的奖金流水仓储
    pub fn applying_ledger() -> MockBonusLedgerRepositoryTrait {
        let mut ledger = MockBonusLedgerRepositoryTrait::new();
        ledger.expect_find_bonus_transaction().returning(|_| Ok(None));
        ledger.expect_apply_bonus_movement().returning(|m| {
            Ok(BonusLedgerOutcome::Applied(BonusTransaction {
                id: 1,
                user_id: m.key.user_id.clone(),
                campaign_id: m.key.campaign_id,
                release_type: m.key.release_type,
                usage_seq: m.key.usage_seq,
                stage: m.key.stage,
                amount: m.amount,
                source_event_id: m.source_event_id.clone(),
                reason: m.reason.clone(),
                created_at: Utc::now(),
            }))
        });
        ledger
    }

    pub fn active_usage(campaign: &Campaign, user_id: &str, locked: Decimal) -> UserCampaignUsage {
        let now = Utc::now();
        let mut user_usage = UserCampaignUsage::new(user_id);
        let usage: &mut CampaignUsage = user_usage.entry(campaign.id, now);
        usage.start_new_cycle(campaign, locked, vec![], "evt-credit", now);
        user_usage
    }
}

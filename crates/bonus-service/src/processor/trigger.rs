//! 活动触发与奖金发放

use std::sync::Arc;

use async_trait::async_trait;
use casino_shared::events::{EventType, MatchedCampaign};
use rule_engine::ConditionScope;
use rust_decimal::Decimal;
use tracing::{debug, info};

use super::{ProcessingState, RuleProcessor};
use crate::error::Result;
use crate::models::{Campaign, CampaignUsage};
use crate::service::{BonusService, CampaignService, CreditOutcome, Eligibility};

pub struct TriggerProcessor {
    campaigns: Arc<CampaignService>,
    bonus: Arc<BonusService>,
}

impl TriggerProcessor {
    pub fn new(campaigns: Arc<CampaignService>, bonus: Arc<BonusService>) -> Self {
        Self { campaigns, bonus }
    }

    fn set_usage_scope(state: &mut ProcessingState, campaign_id: i64) {
        let usage_value = state
            .user_usage
            .get(campaign_id)
            .map(CampaignUsage::to_context_value)
            .unwrap_or_else(|| CampaignUsage::new(campaign_id, state.now).to_context_value());
        state.context.set_scope(ConditionScope::Usage, usage_value);
    }

    /// 按下一轮次落账并同步使用进度
    ///
    /// 该轮次已有流水说明使用记录落后于流水：先按流水重建该轮，
    /// 再重新判断资格，仍然满足时尝试下一轮。
    async fn credit_campaign(
        &self,
        state: &mut ProcessingState,
        campaign: &Campaign,
        amount: Decimal,
        mut matched_rules: Vec<String>,
    ) -> Result<()> {
        let now = state.now;
        loop {
            let usage_seq = state
                .user_usage
                .get(campaign.id)
                .map_or(0, |u| u.times_used)
                + 1;

            let outcome = self
                .bonus
                .credit_bonus(
                    campaign,
                    &state.event.user_id,
                    amount,
                    usage_seq,
                    &state.event.event_id,
                )
                .await?;

            let existing = match outcome {
                CreditOutcome::Credited(tx) => {
                    state.user_usage.entry(campaign.id, now).start_new_cycle(
                        campaign,
                        tx.amount,
                        matched_rules.clone(),
                        &state.event.event_id,
                        now,
                    );
                    state.dirty = true;
                    info!(
                        campaign_id = campaign.id,
                        user_id = %state.event.user_id,
                        amount = %tx.amount,
                        usage_seq,
                        "活动奖金已发放"
                    );
                    state.result.matched_campaigns.push(MatchedCampaign {
                        campaign_id: campaign.id,
                        campaign_name: campaign.name.clone(),
                        matched_rules,
                    });
                    state.push_movement(BonusService::credit_movement(campaign, tx.amount));
                    return Ok(());
                }
                CreditOutcome::Duplicate(existing) => existing,
            };

            let history = self
                .bonus
                .cycle_history(&state.event.user_id, campaign.id, usage_seq)
                .await?;
            let usage = state.user_usage.entry(campaign.id, now);
            usage.restore_cycle(
                campaign,
                usage_seq,
                &history,
                matched_rules.clone(),
                &state.event.event_id,
                now,
            );
            state.dirty = true;
            info!(
                campaign_id = campaign.id,
                usage_seq,
                status = ?usage.status,
                "按奖金流水重建使用进度"
            );

            // 同一事件重投，本轮奖金就是这次发放的
            if existing.source_event_id == state.event.event_id {
                state.result.matched_campaigns.push(MatchedCampaign {
                    campaign_id: campaign.id,
                    campaign_name: campaign.name.clone(),
                    matched_rules,
                });
                return Ok(());
            }

            Self::set_usage_scope(state, campaign.id);
            match self.campaigns.check_eligibility(
                campaign,
                &state.event.user_id,
                state.user_usage.get(campaign.id),
                &state.context,
                now,
            ) {
                Eligibility::Eligible { matched_rules: rules } => matched_rules = rules,
                Eligibility::Ineligible(reason) => {
                    debug!(campaign_id = campaign.id, %reason, "重建后不满足参与条件");
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl RuleProcessor for TriggerProcessor {
    fn name(&self) -> &'static str {
        "trigger"
    }

    fn handles(&self, _event_type: EventType) -> bool {
        true
    }

    async fn process(&self, state: &mut ProcessingState) -> Result<()> {
        let now = state.now;
        let candidates = self
            .campaigns
            .campaigns_triggered_by(state.event.event_type, now)
            .await?;

        for campaign in candidates {
            Self::set_usage_scope(state, campaign.id);

            let eligibility = self.campaigns.check_eligibility(
                &campaign,
                &state.event.user_id,
                state.user_usage.get(campaign.id),
                &state.context,
                now,
            );
            let matched_rules = match eligibility {
                Eligibility::Eligible { matched_rules } => matched_rules,
                Eligibility::Ineligible(reason) => {
                    debug!(campaign_id = campaign.id, %reason, "不满足参与条件");
                    continue;
                }
            };

            let amount = match BonusService::compute_bonus_amount(&campaign.bonus, &state.context) {
                Ok(Some(amount)) => amount,
                Ok(None) => {
                    debug!(campaign_id = campaign.id, "奖金金额为零，不发放");
                    continue;
                }
                Err(e) => {
                    state.record_failure(campaign.id, e)?;
                    continue;
                }
            };

            if let Err(e) = self
                .credit_campaign(state, &campaign, amount, matched_rules)
                .await
            {
                state.record_failure(campaign.id, e)?;
            }
        }
        Ok(())
    }
}

//! 奖金过期与提现没收

use std::sync::Arc;

use async_trait::async_trait;
use casino_shared::events::EventType;

use super::{ProcessingState, RuleProcessor, active_campaigns};
use crate::error::Result;
use crate::models::{Campaign, ForfeitReason};
use crate::service::{BonusReleaseService, CampaignService};

async fn forfeit_all(
    release: &BonusReleaseService,
    state: &mut ProcessingState,
    campaigns: Vec<Campaign>,
    reason: ForfeitReason,
) -> Result<()> {
    for campaign in campaigns {
        let Some(usage) = state.user_usage.get_mut(campaign.id) else {
            continue;
        };

        let outcome = release
            .forfeit(
                &campaign,
                usage,
                &state.event.user_id,
                reason,
                &state.event.event_id,
                state.now,
            )
            .await;

        match outcome {
            Ok(movement) => {
                state.dirty = true;
                if let Some(movement) = movement {
                    state.push_movement(movement);
                }
            }
            Err(e) => state.record_failure(campaign.id, e)?,
        }
    }
    Ok(())
}

/// 惰性过期：任何事件到达时检查进行中的活动是否已过有效期
pub struct ExpiryProcessor {
    campaigns: Arc<CampaignService>,
    release: Arc<BonusReleaseService>,
}

impl ExpiryProcessor {
    pub fn new(campaigns: Arc<CampaignService>, release: Arc<BonusReleaseService>) -> Self {
        Self { campaigns, release }
    }
}

#[async_trait]
impl RuleProcessor for ExpiryProcessor {
    fn name(&self) -> &'static str {
        "expiry"
    }

    fn handles(&self, _event_type: EventType) -> bool {
        true
    }

    async fn process(&self, state: &mut ProcessingState) -> Result<()> {
        let now = state.now;
        let has_expired = state
            .user_usage
            .campaigns
            .values()
            .any(|u| u.is_expired(now));
        if !has_expired {
            return Ok(());
        }

        let expired: Vec<Campaign> = active_campaigns(&self.campaigns, state)
            .await?
            .into_iter()
            .filter(|c| {
                state
                    .user_usage
                    .get(c.id)
                    .is_some_and(|u| u.is_expired(now))
            })
            .collect();

        forfeit_all(&self.release, state, expired, ForfeitReason::Expired).await
    }
}

/// 提现时没收设置了 `forfeit_on_withdrawal` 的活动的剩余锁定奖金
pub struct WithdrawalProcessor {
    campaigns: Arc<CampaignService>,
    release: Arc<BonusReleaseService>,
}

impl WithdrawalProcessor {
    pub fn new(campaigns: Arc<CampaignService>, release: Arc<BonusReleaseService>) -> Self {
        Self { campaigns, release }
    }
}

#[async_trait]
impl RuleProcessor for WithdrawalProcessor {
    fn name(&self) -> &'static str {
        "withdrawal"
    }

    fn handles(&self, event_type: EventType) -> bool {
        event_type == EventType::Withdrawal
    }

    async fn process(&self, state: &mut ProcessingState) -> Result<()> {
        let forfeitable: Vec<Campaign> = active_campaigns(&self.campaigns, state)
            .await?
            .into_iter()
            .filter(|c| c.forfeit_on_withdrawal)
            .collect();

        forfeit_all(&self.release, state, forfeitable, ForfeitReason::Withdrawal).await
    }
}

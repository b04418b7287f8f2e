//! 分阶段释放

use std::sync::Arc;

use async_trait::async_trait;
use casino_shared::events::EventType;

use super::{ProcessingState, RuleProcessor, active_campaigns};
use crate::error::Result;
use crate::service::{BonusReleaseService, CampaignService};

pub struct ReleaseProcessor {
    campaigns: Arc<CampaignService>,
    release: Arc<BonusReleaseService>,
}

impl ReleaseProcessor {
    pub fn new(campaigns: Arc<CampaignService>, release: Arc<BonusReleaseService>) -> Self {
        Self { campaigns, release }
    }
}

#[async_trait]
impl RuleProcessor for ReleaseProcessor {
    fn name(&self) -> &'static str {
        "release"
    }

    /// 阶段可以由任意事件类型触发，由阶段配置决定
    fn handles(&self, _event_type: EventType) -> bool {
        true
    }

    async fn process(&self, state: &mut ProcessingState) -> Result<()> {
        let event_type = state.event.event_type;

        for campaign in active_campaigns(&self.campaigns, state).await? {
            if !campaign
                .release_schedule
                .iter()
                .any(|s| s.trigger_event == event_type)
            {
                continue;
            }
            let Some(usage) = state.user_usage.get_mut(campaign.id) else {
                continue;
            };

            let before = usage.clone();
            let outcome = self
                .release
                .advance(&campaign, usage, &mut state.context, &state.event, state.now)
                .await;
            let changed = *usage != before;

            match outcome {
                Ok(movements) => {
                    state.dirty |= changed;
                    state.result.bonus_movements.extend(movements);
                }
                Err(e) => state.record_failure(campaign.id, e)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UsageStatus;
    use crate::models::campaign::fixtures::locked_deposit_campaign;
    use crate::processor::test_support::{active_usage, applying_ledger, campaign_service, state_for};
    use casino_shared::events::MovementKind;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn processor(campaign: crate::models::Campaign) -> ReleaseProcessor {
        ReleaseProcessor::new(
            campaign_service(vec![campaign]),
            Arc::new(BonusReleaseService::new(Arc::new(applying_ledger()))),
        )
    }

    #[tokio::test]
    async fn test_release_first_stage() {
        let campaign = locked_deposit_campaign(1);
        let mut usage = active_usage(&campaign, "u-1", dec!(200));
        usage.get_mut(1).unwrap().wagered = dec!(500);

        let mut state = state_for(EventType::Bet, json!({"amount": 100}), usage);
        processor(campaign).process(&mut state).await.unwrap();

        let movements = &state.result.bonus_movements;
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].kind, MovementKind::StageRelease);
        assert_eq!(movements[0].amount, dec!(100));
        assert!(state.dirty);
        assert_eq!(state.user_usage.get(1).unwrap().released_stages, vec![1]);
    }

    #[tokio::test]
    async fn test_release_completes_campaign() {
        let campaign = locked_deposit_campaign(1);
        let mut usage = active_usage(&campaign, "u-1", dec!(200));
        usage.get_mut(1).unwrap().wagered = dec!(1000);

        let mut state = state_for(EventType::Bet, json!({"amount": 100}), usage);
        processor(campaign).process(&mut state).await.unwrap();

        assert_eq!(state.result.bonus_movements.len(), 2);
        assert!(state.result.bonus_movements[1].campaign_completed);
        assert_eq!(state.user_usage.get(1).unwrap().status, UsageStatus::Completed);
    }

    #[tokio::test]
    async fn test_other_event_types_do_not_release() {
        let campaign = locked_deposit_campaign(1);
        let mut usage = active_usage(&campaign, "u-1", dec!(200));
        usage.get_mut(1).unwrap().wagered = dec!(1000);

        let mut state = state_for(EventType::Win, json!({"amount": 100}), usage);
        processor(campaign).process(&mut state).await.unwrap();

        assert!(state.result.bonus_movements.is_empty());
        assert!(!state.dirty);
    }
}

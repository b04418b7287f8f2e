//! 奖金事件处理器
//!
//! 实现 `EventProcessor`，把领域事件交给处理器链：
//! 读取用户活动记录 -> 构建评估上下文（event / user / wallet）-> 执行处理器 -> 保存活动记录。
//!
//! 用户活动记录中保存了最近处理的事件 ID。幂等标记写入失败后同一事件再次到达时，
//! 若活动记录已反映该事件，直接跳过，流水累计不会重复计算。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use casino_shared::error::CasinoError;
use casino_shared::events::{EventPayload, EventProcessor, EventResult, EventType};
use casino_shared::observability::metrics;
use rule_engine::{ConditionScope, EvaluationContext};
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::processor::{ProcessingState, ProcessorRegistry};
use crate::repository::{ProcessedEventStore, WalletRepositoryTrait};
use crate::service::CampaignService;

pub struct BonusEventProcessor {
    campaigns: Arc<CampaignService>,
    wallet_repo: Arc<dyn WalletRepositoryTrait>,
    processed: Arc<dyn ProcessedEventStore>,
    registry: ProcessorRegistry,
}

impl BonusEventProcessor {
    pub fn new(
        campaigns: Arc<CampaignService>,
        wallet_repo: Arc<dyn WalletRepositoryTrait>,
        processed: Arc<dyn ProcessedEventStore>,
        registry: ProcessorRegistry,
    ) -> Self {
        Self {
            campaigns,
            wallet_repo,
            processed,
            registry,
        }
    }

    async fn build_context(&self, event: &EventPayload) -> Result<EvaluationContext> {
        let wallet = self.wallet_repo.get_wallet(&event.user_id).await?;
        Ok(EvaluationContext::new(event.to_evaluation_context())
            .with_scope(ConditionScope::Wallet, wallet.to_context_value()))
    }

    #[instrument(
        skip_all,
        fields(event_id = %event.event_id, event_type = %event.event_type, user_id = %event.user_id)
    )]
    async fn handle(&self, event: &EventPayload) -> Result<EventResult> {
        let start = Instant::now();

        let user_usage = self.campaigns.get_user_usage(&event.user_id).await?;
        if user_usage.last_event_id.as_deref() == Some(event.event_id.as_str()) {
            info!("活动记录已包含该事件的处理结果，跳过");
            let mut result = EventResult::new(event.event_id.clone());
            result.processed = true;
            return Ok(result);
        }

        let context = self.build_context(event).await?;
        let mut state = ProcessingState::new(event.clone(), user_usage, context);

        self.registry.run(&mut state).await?;

        if state.dirty {
            state.user_usage.last_event_id = Some(event.event_id.clone());
            self.campaigns.save_user_usage(&state.user_usage).await?;
        }

        let mut result = state.result;
        result.processed = true;
        result.processing_time_ms = start.elapsed().as_millis() as i64;

        info!(
            matched = result.matched_campaigns.len(),
            movements = result.bonus_movements.len(),
            errors = result.errors.len(),
            processing_time_ms = result.processing_time_ms,
            "奖金事件处理完成"
        );
        Ok(result)
    }
}

#[async_trait]
impl EventProcessor for BonusEventProcessor {
    async fn process(&self, event: &EventPayload) -> std::result::Result<EventResult, CasinoError> {
        let start = Instant::now();
        let outcome = self.handle(event).await;
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(result) => {
                let status = if result.errors.is_empty() { "success" } else { "partial" };
                metrics::record_event_processed(event.event_type.as_str(), status, elapsed);
                Ok(result)
            }
            Err(e) => {
                warn!(event_id = %event.event_id, error_code = e.error_code(), error = %e, "奖金事件处理失败");
                metrics::record_event_processed(event.event_type.as_str(), "failed", elapsed);
                Err(e.into())
            }
        }
    }

    fn supported_event_types(&self) -> Vec<EventType> {
        EventType::ALL.to_vec()
    }

    async fn is_processed(&self, event_id: &str) -> std::result::Result<bool, CasinoError> {
        Ok(self.processed.is_processed(event_id).await?)
    }

    async fn mark_processed(&self, event_id: &str) -> std::result::Result<(), CasinoError> {
        self.processed.mark_processed(event_id).await?;
        Ok(())
    }
}

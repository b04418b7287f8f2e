//! 集成测试公共设施
//!
//! 仓储与消息通道的内存实现，串起钱包服务、处理器链与消费者，无需 PostgreSQL 和 Redis。

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bonus_service::error::{BonusError, Result};
use bonus_service::models::{
    AmountConfig, BonusKind, BonusTransaction, BonusTransactionKey, Campaign, CampaignStatus,
    NewBonusTransaction, NewWalletTransaction, ReleaseStage, TransactionType, UserCampaignUsage,
    Wallet, WalletTransaction, plan_bucket_changes,
};
use bonus_service::repository::{
    BonusLedgerOutcome, BonusLedgerRepositoryTrait, CampaignRepositoryTrait, CampaignUsageStore,
    ProcessedEventStore, WalletRepositoryTrait, WalletTxOutcome,
};
use bonus_service::{
    BonusEventProcessor, BonusReleaseService, BonusService, CampaignService, EventPublisher,
    HandleOutcome, MessageHandler, ProcessorRegistry, WalletService,
};
use casino_shared::config::PubSubConfig;
use casino_shared::error::CasinoError;
use casino_shared::events::{EventPayload, EventType, NotificationEvent};
use casino_shared::pubsub::ChannelMessage;
use casino_shared::retry::RetryPolicy;
use chrono::{Duration, Utc};
use rule_engine::{Condition, ConditionScope, Operator, RuleSet};
use rust_decimal::Decimal;
use sqlx::types::Json;

// ---------------------------------------------------------------------------
// 活动配置
// ---------------------------------------------------------------------------

fn base_campaign(id: i64, name: &str, trigger: EventType) -> Campaign {
    let now = Utc::now();
    Campaign {
        id,
        name: name.to_string(),
        description: None,
        status: CampaignStatus::Active,
        trigger_event: trigger,
        start_at: now - Duration::days(1),
        end_at: Some(now + Duration::days(30)),
        eligibility: Json(RuleSet::default()),
        allowed_users: vec![],
        max_usage_per_user: 1,
        bonus_kind: BonusKind::Unlocked,
        bonus: Json(AmountConfig::fixed(Decimal::from(10))),
        release_schedule: Json(vec![]),
        bonus_validity_days: None,
        forfeit_on_withdrawal: false,
        priority: 0,
        created_at: now,
        updated_at: now,
    }
}

fn wager_stage(stage: i32, wagered: i64, percent: i64) -> ReleaseStage {
    ReleaseStage {
        stage,
        name: format!("流水 {wagered}"),
        trigger_event: EventType::Bet,
        rules: RuleSet::all(vec![Condition::new(
            ConditionScope::Usage,
            "wagered",
            Operator::Gte,
            wagered,
        )]),
        release: AmountConfig::percentage(Decimal::from(percent)),
    }
}

/// 首充 100% 锁定奖金，封顶 200；流水 500 释放一半，流水 1000 释放剩余
pub fn first_deposit_campaign(id: i64) -> Campaign {
    let mut campaign = base_campaign(id, "首充奖励", EventType::Deposit);
    campaign.eligibility = Json(RuleSet::all(vec![
        Condition::new(ConditionScope::Event, "amount", Operator::Gte, 20),
        Condition::new(ConditionScope::Event, "deposit_count", Operator::Eq, 1),
    ]));
    campaign.bonus_kind = BonusKind::Locked;
    campaign.bonus = Json(AmountConfig::percentage(Decimal::ONE_HUNDRED).with_max(Decimal::from(200)));
    campaign.release_schedule = Json(vec![wager_stage(1, 500, 50), wager_stage(2, 1000, 50)]);
    campaign.bonus_validity_days = Some(30);
    campaign.forfeit_on_withdrawal = true;
    campaign.priority = 10;
    campaign
}

/// 注册送 10 元可用奖金
pub fn registration_campaign(id: i64) -> Campaign {
    base_campaign(id, "注册礼金", EventType::Registration)
}

// ---------------------------------------------------------------------------
// 内存仓储
// ---------------------------------------------------------------------------

pub struct InMemoryCampaignRepository {
    campaigns: Vec<Campaign>,
}

impl InMemoryCampaignRepository {
    pub fn new(campaigns: Vec<Campaign>) -> Self {
        Self { campaigns }
    }
}

#[async_trait]
impl CampaignRepositoryTrait for InMemoryCampaignRepository {
    async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(self
            .campaigns
            .iter()
            .filter(|c| c.status != CampaignStatus::Draft)
            .cloned()
            .collect())
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        Ok(self.campaigns.iter().find(|c| c.id == id).cloned())
    }
}

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<String, Wallet>,
    wallet_txs: Vec<WalletTransaction>,
    bonus_txs: Vec<BonusTransaction>,
}

/// 钱包与奖金流水共用一份状态，对应同一个数据库
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn wallet(&self, user_id: &str) -> Wallet {
        let state = self.state.lock().unwrap();
        state
            .wallets
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| Wallet::empty(user_id))
    }

    pub fn bonus_transactions(&self) -> Vec<BonusTransaction> {
        self.state.lock().unwrap().bonus_txs.clone()
    }
}

#[async_trait]
impl WalletRepositoryTrait for InMemoryLedger {
    async fn get_wallet(&self, user_id: &str) -> Result<Wallet> {
        Ok(self.wallet(user_id))
    }

    async fn find_transaction(
        &self,
        user_id: &str,
        tx_type: TransactionType,
        reference: &str,
    ) -> Result<Option<WalletTransaction>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .wallet_txs
            .iter()
            .find(|t| t.user_id == user_id && t.tx_type == tx_type && t.reference == reference)
            .cloned())
    }

    async fn count_transactions(&self, user_id: &str, tx_type: TransactionType) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .wallet_txs
            .iter()
            .filter(|t| t.user_id == user_id && t.tx_type == tx_type)
            .count() as i64)
    }

    async fn apply_transaction(&self, new_tx: &NewWalletTransaction) -> Result<WalletTxOutcome> {
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state.wallet_txs.iter().find(|t| {
            t.user_id == new_tx.user_id && t.tx_type == new_tx.tx_type && t.reference == new_tx.reference
        }) {
            return Ok(WalletTxOutcome::Duplicate(existing.clone()));
        }

        let original = match new_tx.original_reference.as_deref() {
            Some(original_ref) if new_tx.tx_type == TransactionType::Refund => {
                let refunded = state.wallet_txs.iter().any(|t| {
                    t.user_id == new_tx.user_id
                        && t.tx_type == TransactionType::Refund
                        && t.original_reference.as_deref() == Some(original_ref)
                });
                if refunded {
                    return Err(BonusError::Validation(format!("下注已退款: {original_ref}")));
                }
                state
                    .wallet_txs
                    .iter()
                    .find(|t| {
                        t.user_id == new_tx.user_id
                            && t.tx_type == TransactionType::Bet
                            && t.reference == original_ref
                    })
                    .cloned()
            }
            _ => None,
        };

        let wallet = state
            .wallets
            .get(&new_tx.user_id)
            .cloned()
            .unwrap_or_else(|| Wallet::empty(new_tx.user_id.clone()));
        let changes = plan_bucket_changes(&wallet, new_tx.tx_type, new_tx.amount, original.as_ref())?;
        let next = wallet.apply(&changes)?;

        let transaction = WalletTransaction {
            id: state.wallet_txs.len() as i64 + 1,
            user_id: new_tx.user_id.clone(),
            tx_type: new_tx.tx_type,
            amount: new_tx.amount,
            reference: new_tx.reference.clone(),
            original_reference: new_tx.original_reference.clone(),
            bucket_changes: Json(changes),
            metadata: Json(new_tx.metadata.clone()),
            created_at: Utc::now(),
        };
        state.wallets.insert(new_tx.user_id.clone(), next.clone());
        state.wallet_txs.push(transaction.clone());

        Ok(WalletTxOutcome::Applied {
            transaction,
            wallet: next,
        })
    }
}

#[async_trait]
impl BonusLedgerRepositoryTrait for InMemoryLedger {
    async fn find_bonus_transaction(
        &self,
        key: &BonusTransactionKey,
    ) -> Result<Option<BonusTransaction>> {
        let state = self.state.lock().unwrap();
        Ok(state.bonus_txs.iter().find(|t| t.key() == *key).cloned())
    }

    async fn apply_bonus_movement(
        &self,
        movement: &NewBonusTransaction,
    ) -> Result<BonusLedgerOutcome> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.bonus_txs.iter().find(|t| t.key() == movement.key) {
            return Ok(BonusLedgerOutcome::Duplicate(existing.clone()));
        }

        let key = &movement.key;
        let wallet = state
            .wallets
            .get(&key.user_id)
            .cloned()
            .unwrap_or_else(|| Wallet::empty(key.user_id.clone()));
        let next = wallet.apply(&key.release_type.bucket_changes(movement.amount))?;

        let tx = BonusTransaction {
            id: state.bonus_txs.len() as i64 + 1,
            user_id: key.user_id.clone(),
            campaign_id: key.campaign_id,
            release_type: key.release_type,
            usage_seq: key.usage_seq,
            stage: key.stage,
            amount: movement.amount,
            source_event_id: movement.source_event_id.clone(),
            reason: movement.reason.clone(),
            created_at: Utc::now(),
        };
        state.wallets.insert(key.user_id.clone(), next);
        state.bonus_txs.push(tx.clone());
        Ok(BonusLedgerOutcome::Applied(tx))
    }

    async fn list_cycle(
        &self,
        user_id: &str,
        campaign_id: i64,
        usage_seq: i32,
    ) -> Result<Vec<BonusTransaction>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bonus_txs
            .iter()
            .filter(|t| t.user_id == user_id && t.campaign_id == campaign_id && t.usage_seq == usage_seq)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryUsageStore {
    usages: Mutex<HashMap<String, UserCampaignUsage>>,
}

impl InMemoryUsageStore {
    pub fn get(&self, user_id: &str) -> Option<UserCampaignUsage> {
        self.usages.lock().unwrap().get(user_id).cloned()
    }

    /// 模拟缓存过期或被清理
    pub fn clear(&self, user_id: &str) {
        self.usages.lock().unwrap().remove(user_id);
    }
}

#[async_trait]
impl CampaignUsageStore for InMemoryUsageStore {
    async fn load(&self, user_id: &str) -> Result<Option<UserCampaignUsage>> {
        Ok(self.get(user_id))
    }

    async fn save(&self, usage: &UserCampaignUsage) -> Result<()> {
        self.usages
            .lock()
            .unwrap()
            .insert(usage.user_id.clone(), usage.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProcessedStore {
    processed: Mutex<HashSet<String>>,
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedStore {
    async fn is_processed(&self, event_id: &str) -> Result<bool> {
        Ok(self.processed.lock().unwrap().contains(event_id))
    }

    async fn mark_processed(&self, event_id: &str) -> Result<bool> {
        Ok(self.processed.lock().unwrap().insert(event_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// 内存消息通道
// ---------------------------------------------------------------------------

/// 记录发布的事件、通知和死信
#[derive(Default)]
pub struct InMemoryPublisher {
    events: Mutex<Vec<EventPayload>>,
    notifications: Mutex<Vec<NotificationEvent>>,
    dead_letters: Mutex<Vec<(ChannelMessage, String)>>,
}

impl InMemoryPublisher {
    /// 取出尚未投递的领域事件
    pub fn drain_events(&self) -> Vec<EventPayload> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn notifications(&self) -> Vec<NotificationEvent> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn dead_letters(&self) -> Vec<(ChannelMessage, String)> {
        self.dead_letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish_event(&self, event: &EventPayload) -> std::result::Result<(), CasinoError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn publish_notification(
        &self,
        notification: &NotificationEvent,
    ) -> std::result::Result<(), CasinoError> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn push_dead_letter(
        &self,
        message: &ChannelMessage,
        error: &str,
    ) -> std::result::Result<(), CasinoError> {
        self.dead_letters
            .lock()
            .unwrap()
            .push((message.clone(), error.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 组装
// ---------------------------------------------------------------------------

pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub usage_store: Arc<InMemoryUsageStore>,
    pub publisher: Arc<InMemoryPublisher>,
    pub wallet: WalletService,
    pub handler: MessageHandler,
}

impl Harness {
    pub fn new(campaigns: Vec<Campaign>) -> Self {
        let ledger = Arc::new(InMemoryLedger::default());
        let usage_store = Arc::new(InMemoryUsageStore::default());
        let publisher = Arc::new(InMemoryPublisher::default());

        let campaign_service = Arc::new(CampaignService::new(
            Arc::new(InMemoryCampaignRepository::new(campaigns)),
            usage_store.clone(),
            300,
        ));
        let registry = ProcessorRegistry::standard(
            campaign_service.clone(),
            Arc::new(BonusService::new(ledger.clone())),
            Arc::new(BonusReleaseService::new(ledger.clone())),
        );
        let processor = Arc::new(BonusEventProcessor::new(
            campaign_service.clone(),
            ledger.clone(),
            Arc::new(InMemoryProcessedStore::default()),
            registry,
        ));
        let handler = MessageHandler::new(
            processor,
            campaign_service,
            publisher.clone(),
            RetryPolicy::with_max_retries(0),
            PubSubConfig::default(),
        );
        let wallet = WalletService::new(ledger.clone(), publisher.clone());

        Self {
            ledger,
            usage_store,
            publisher,
            wallet,
            handler,
        }
    }

    /// 把钱包发布的事件投递给消费者，模拟 pub/sub
    pub async fn deliver_pending(&self) -> Vec<EventPayload> {
        let events = self.publisher.drain_events();
        for event in &events {
            self.deliver(event).await;
        }
        events
    }

    pub async fn deliver(&self, event: &EventPayload) -> HandleOutcome {
        let msg = ChannelMessage::new(
            casino_shared::pubsub::channels::DOMAIN_EVENTS,
            serde_json::to_vec(event).unwrap(),
        );
        self.handler.handle(&msg).await.unwrap()
    }
}

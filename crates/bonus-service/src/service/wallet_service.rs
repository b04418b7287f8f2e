//! 钱包服务
//!
//! 记录充值、提现、下注、派彩与退款。每笔交易落账后发布对应的领域事件，
//! 奖金引擎订阅这些事件推进活动。
//!
//! 同一 `(user_id, tx_type, reference)` 重复提交时返回已有交易，不重复发布事件。

use std::sync::Arc;

use casino_shared::events::{EventPayload, MAX_AMOUNT};
use casino_shared::observability::metrics;
use rust_decimal::Decimal;
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::error::{BonusError, Result};
use crate::models::{NewWalletTransaction, TransactionType, Wallet, WalletTransaction};
use crate::publisher::EventPublisher;
use crate::repository::{WalletRepositoryTrait, WalletTxOutcome};

const EVENT_SOURCE: &str = "wallet";

pub struct WalletService {
    wallet_repo: Arc<dyn WalletRepositoryTrait>,
    publisher: Arc<dyn EventPublisher>,
}

impl WalletService {
    pub fn new(wallet_repo: Arc<dyn WalletRepositoryTrait>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            wallet_repo,
            publisher,
        }
    }

    pub async fn get_wallet(&self, user_id: &str) -> Result<Wallet> {
        self.wallet_repo.get_wallet(user_id).await
    }

    pub async fn deposit(
        &self,
        user_id: &str,
        amount: Decimal,
        reference: &str,
        metadata: Value,
    ) -> Result<WalletTxOutcome> {
        self.record(user_id, TransactionType::Deposit, amount, reference, None, metadata)
            .await
    }

    pub async fn withdraw(
        &self,
        user_id: &str,
        amount: Decimal,
        reference: &str,
        metadata: Value,
    ) -> Result<WalletTxOutcome> {
        self.record(user_id, TransactionType::Withdrawal, amount, reference, None, metadata)
            .await
    }

    /// 下注，metadata 中的 `game_id` 等字段随事件发布
    pub async fn place_bet(
        &self,
        user_id: &str,
        amount: Decimal,
        reference: &str,
        metadata: Value,
    ) -> Result<WalletTxOutcome> {
        self.record(user_id, TransactionType::Bet, amount, reference, None, metadata)
            .await
    }

    pub async fn settle_win(
        &self,
        user_id: &str,
        amount: Decimal,
        reference: &str,
        metadata: Value,
    ) -> Result<WalletTxOutcome> {
        self.record(user_id, TransactionType::Win, amount, reference, None, metadata)
            .await
    }

    /// 退还一笔下注
    ///
    /// 退款金额取原下注金额，原下注不存在时返回 `TransactionNotFound`
    pub async fn refund(
        &self,
        user_id: &str,
        reference: &str,
        original_reference: &str,
        metadata: Value,
    ) -> Result<WalletTxOutcome> {
        let original = self
            .wallet_repo
            .find_transaction(user_id, TransactionType::Bet, original_reference)
            .await?
            .ok_or_else(|| BonusError::TransactionNotFound {
                reference: original_reference.to_string(),
            })?;

        self.record(
            user_id,
            TransactionType::Refund,
            original.amount,
            reference,
            Some(&original),
            metadata,
        )
        .await
    }

    #[instrument(skip(self, original, metadata))]
    async fn record(
        &self,
        user_id: &str,
        tx_type: TransactionType,
        amount: Decimal,
        reference: &str,
        original: Option<&WalletTransaction>,
        metadata: Value,
    ) -> Result<WalletTxOutcome> {
        validate_amount(tx_type, amount)?;
        if reference.trim().is_empty() {
            return Err(BonusError::Validation("reference 不能为空".to_string()));
        }
        if !metadata.is_null() && !metadata.is_object() {
            return Err(BonusError::Validation("metadata 必须是 JSON 对象".to_string()));
        }

        let new_tx = NewWalletTransaction {
            user_id: user_id.to_string(),
            tx_type,
            amount,
            reference: reference.to_string(),
            original_reference: original.map(|o| o.reference.clone()),
            metadata,
        };

        let outcome = match self.wallet_repo.apply_transaction(&new_tx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_wallet_transaction(tx_type.as_str(), "rejected");
                return Err(e);
            }
        };

        match &outcome {
            WalletTxOutcome::Applied { transaction, wallet } => {
                metrics::record_wallet_transaction(tx_type.as_str(), "applied");
                info!(
                    tx_id = transaction.id,
                    spendable = %wallet.spendable(),
                    "钱包交易已落账"
                );
                self.publish_event(transaction, original).await;
            }
            WalletTxOutcome::Duplicate(existing) => {
                metrics::record_wallet_transaction(tx_type.as_str(), "duplicate");
                info!(tx_id = existing.id, "交易已存在，按幂等返回");
            }
        }

        Ok(outcome)
    }

    /// 发布领域事件，失败只记录告警，已落账的交易不回滚
    async fn publish_event(&self, transaction: &WalletTransaction, original: Option<&WalletTransaction>) {
        let mut data = match self.event_data(transaction, original).await {
            Ok(data) => data,
            Err(e) => {
                warn!(tx_id = transaction.id, error = %e, "构建事件数据失败，使用基础字段");
                Map::new()
            }
        };
        data.insert("amount".into(), json!(transaction.amount));
        data.insert("reference".into(), json!(transaction.reference));
        data.insert("tx_id".into(), json!(transaction.id));

        let event = EventPayload::new(
            transaction.tx_type.event_type(),
            transaction.user_id.clone(),
            Value::Object(data),
            EVENT_SOURCE,
        )
        .with_trace_id(casino_shared::observability::tracing::current_trace_id());

        if let Err(e) = self.publisher.publish_event(&event).await {
            warn!(
                tx_id = transaction.id,
                event_id = %event.event_id,
                error = %e,
                "领域事件发布失败"
            );
        }
    }

    async fn event_data(
        &self,
        transaction: &WalletTransaction,
        original: Option<&WalletTransaction>,
    ) -> Result<Map<String, Value>> {
        let mut data = match &transaction.metadata.0 {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        // 退款携带原下注时间，奖金引擎据此判断该下注是否计入过流水
        if let Some(original) = original {
            data.insert("original_reference".into(), json!(original.reference));
            data.insert("original_bet_at".into(), json!(original.created_at.to_rfc3339()));
        }

        // 第几次充值，供首充类活动判断
        if transaction.tx_type == TransactionType::Deposit {
            let count = self
                .wallet_repo
                .count_transactions(&transaction.user_id, TransactionType::Deposit)
                .await?;
            data.insert("deposit_count".into(), json!(count));
        }

        Ok(data)
    }
}

/// 金额必须为正、最多两位小数且不超过账务上限
fn validate_amount(tx_type: TransactionType, amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(BonusError::InvalidAmount(format!(
            "{tx_type} 金额必须为正数: {amount}"
        )));
    }
    if amount.normalize().scale() > 2 {
        return Err(BonusError::InvalidAmount(format!(
            "{tx_type} 金额最多两位小数: {amount}"
        )));
    }
    if amount > MAX_AMOUNT {
        return Err(BonusError::InvalidAmount(format!(
            "{tx_type} 金额超过上限 {MAX_AMOUNT}: {amount}"
        )));
    }
    Ok(())
}

//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    BonusTransaction, BonusTransactionKey, Campaign, NewBonusTransaction, NewWalletTransaction,
    TransactionType, UserCampaignUsage, Wallet, WalletTransaction,
};

/// 钱包交易落账结果
#[derive(Debug, Clone)]
pub enum WalletTxOutcome {
    Applied {
        transaction: WalletTransaction,
        wallet: Wallet,
    },
    /// 同一 (user_id, tx_type, reference) 已落账，返回已有记录
    Duplicate(WalletTransaction),
}

/// 奖金流水落账结果
#[derive(Debug, Clone)]
pub enum BonusLedgerOutcome {
    Applied(BonusTransaction),
    /// 同一幂等键已存在
    Duplicate(BonusTransaction),
}

/// 活动仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CampaignRepositoryTrait: Send + Sync {
    async fn list_campaigns(&self) -> Result<Vec<Campaign>>;
    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>>;
}

/// 钱包仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletRepositoryTrait: Send + Sync {
    /// 未开户的用户返回零余额钱包
    async fn get_wallet(&self, user_id: &str) -> Result<Wallet>;

    async fn find_transaction(
        &self,
        user_id: &str,
        tx_type: TransactionType,
        reference: &str,
    ) -> Result<Option<WalletTransaction>>;

    async fn count_transactions(&self, user_id: &str, tx_type: TransactionType) -> Result<i64>;

    /// 锁定钱包、计算分账户变动并写入交易，整体在一个事务内完成
    async fn apply_transaction(&self, tx: &NewWalletTransaction) -> Result<WalletTxOutcome>;
}

/// 奖金流水仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BonusLedgerRepositoryTrait: Send + Sync {
    async fn find_bonus_transaction(&self, key: &BonusTransactionKey)
    -> Result<Option<BonusTransaction>>;

    /// 写入奖金流水并同步调整钱包奖金分账户
    async fn apply_bonus_movement(&self, movement: &NewBonusTransaction)
    -> Result<BonusLedgerOutcome>;

    /// 某一轮参与的全部奖金流水，按写入顺序
    async fn list_cycle(
        &self,
        user_id: &str,
        campaign_id: i64,
        usage_seq: i32,
    ) -> Result<Vec<BonusTransaction>>;
}

/// 用户活动使用记录存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CampaignUsageStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<UserCampaignUsage>>;
    async fn save(&self, usage: &UserCampaignUsage) -> Result<()>;
}

/// 事件幂等标记存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> Result<bool>;

    /// 返回 false 表示标记已存在
    async fn mark_processed(&self, event_id: &str) -> Result<bool>;
}

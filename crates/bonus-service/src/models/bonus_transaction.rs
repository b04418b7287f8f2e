//! 奖金流水
//!
//! 每一次奖金发放、释放、没收都落一条流水，`BonusTransactionKey` 保证同一轮同一阶段只落账一次。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{BonusReleaseType, WalletBucket};
use super::wallet::BucketChanges;

impl BonusReleaseType {
    /// 对钱包分账户的变动
    pub fn bucket_changes(&self, amount: Decimal) -> BucketChanges {
        match self {
            Self::Locked => BucketChanges::single(WalletBucket::BonusLocked, amount),
            Self::Unlocked => BucketChanges::single(WalletBucket::BonusUnlocked, amount),
            Self::Stage => BucketChanges {
                bonus_locked: -amount,
                bonus_unlocked: amount,
                ..Default::default()
            },
            Self::Forfeit => BucketChanges::single(WalletBucket::BonusLocked, -amount),
        }
    }
}

/// 奖金流水记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BonusTransaction {
    pub id: i64,
    pub user_id: String,
    pub campaign_id: i64,
    pub release_type: BonusReleaseType,
    pub usage_seq: i32,
    /// 分阶段释放的阶段序号，其他类型为 0
    pub stage: i32,
    pub amount: Decimal,
    /// 触发本次变动的事件
    pub source_event_id: String,
    #[sqlx(default)]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BonusTransaction {
    pub fn key(&self) -> BonusTransactionKey {
        BonusTransactionKey {
            user_id: self.user_id.clone(),
            campaign_id: self.campaign_id,
            release_type: self.release_type,
            usage_seq: self.usage_seq,
            stage: self.stage,
        }
    }
}

/// 奖金流水幂等键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BonusTransactionKey {
    pub user_id: String,
    pub campaign_id: i64,
    pub release_type: BonusReleaseType,
    pub usage_seq: i32,
    pub stage: i32,
}

impl BonusTransactionKey {
    /// 发放、没收类流水，不区分阶段
    pub fn new(
        user_id: impl Into<String>,
        campaign_id: i64,
        release_type: BonusReleaseType,
        usage_seq: i32,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            campaign_id,
            release_type,
            usage_seq,
            stage: 0,
        }
    }

    pub fn stage(user_id: impl Into<String>, campaign_id: i64, usage_seq: i32, stage: i32) -> Self {
        Self {
            stage,
            ..Self::new(user_id, campaign_id, BonusReleaseType::Stage, usage_seq)
        }
    }
}

impl std::fmt::Display for BonusTransactionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.user_id, self.campaign_id, self.release_type, self.usage_seq, self.stage
        )
    }
}

/// 待写入的奖金流水
#[derive(Debug, Clone)]
pub struct NewBonusTransaction {
    pub key: BonusTransactionKey,
    pub amount: Decimal,
    pub source_event_id: String,
    pub reason: Option<String>,
}

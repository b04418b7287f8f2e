//! 钱包与钱包交易
//!
//! 钱包分为充值本金、可提现余额、锁定奖金、可用奖金四个分账户。
//! 每笔交易记录对各分账户的变动，退款按原下注的变动原样冲回。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use super::enums::{TransactionType, WalletBucket};
use crate::error::{BonusError, Result};

/// 各分账户的变动量，正数为入账
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketChanges {
    #[serde(default)]
    pub deposit: Decimal,
    #[serde(default)]
    pub withdrawable: Decimal,
    #[serde(default)]
    pub bonus_locked: Decimal,
    #[serde(default)]
    pub bonus_unlocked: Decimal,
}

impl BucketChanges {
    /// 只变动单个分账户
    pub fn single(bucket: WalletBucket, delta: Decimal) -> Self {
        let mut changes = Self::default();
        *changes.bucket_mut(bucket) = delta;
        changes
    }

    pub fn get(&self, bucket: WalletBucket) -> Decimal {
        match bucket {
            WalletBucket::Deposit => self.deposit,
            WalletBucket::Withdrawable => self.withdrawable,
            WalletBucket::BonusLocked => self.bonus_locked,
            WalletBucket::BonusUnlocked => self.bonus_unlocked,
        }
    }

    fn bucket_mut(&mut self, bucket: WalletBucket) -> &mut Decimal {
        match bucket {
            WalletBucket::Deposit => &mut self.deposit,
            WalletBucket::Withdrawable => &mut self.withdrawable,
            WalletBucket::BonusLocked => &mut self.bonus_locked,
            WalletBucket::BonusUnlocked => &mut self.bonus_unlocked,
        }
    }

    pub fn negate(&self) -> Self {
        // 避免产生 -0
        let neg = |v: Decimal| if v.is_zero() { Decimal::ZERO } else { -v };
        Self {
            deposit: neg(self.deposit),
            withdrawable: neg(self.withdrawable),
            bonus_locked: neg(self.bonus_locked),
            bonus_unlocked: neg(self.bonus_unlocked),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// 钱包余额
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub user_id: String,
    pub deposit_balance: Decimal,
    pub withdrawable_balance: Decimal,
    pub bonus_locked: Decimal,
    pub bonus_unlocked: Decimal,
}

impl Wallet {
    /// 尚未有任何交易的用户视为零余额
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            deposit_balance: Decimal::ZERO,
            withdrawable_balance: Decimal::ZERO,
            bonus_locked: Decimal::ZERO,
            bonus_unlocked: Decimal::ZERO,
        }
    }

    pub fn balance(&self, bucket: WalletBucket) -> Decimal {
        match bucket {
            WalletBucket::Deposit => self.deposit_balance,
            WalletBucket::Withdrawable => self.withdrawable_balance,
            WalletBucket::BonusLocked => self.bonus_locked,
            WalletBucket::BonusUnlocked => self.bonus_unlocked,
        }
    }

    /// 可用于下注的总额，锁定奖金不计入
    pub fn spendable(&self) -> Decimal {
        self.deposit_balance + self.withdrawable_balance + self.bonus_unlocked
    }

    /// 应用变动，任一分账户变为负数时返回余额不足
    pub fn apply(&self, changes: &BucketChanges) -> Result<Wallet> {
        let mut next = self.clone();
        for bucket in [
            WalletBucket::Deposit,
            WalletBucket::Withdrawable,
            WalletBucket::BonusLocked,
            WalletBucket::BonusUnlocked,
        ] {
            let current = self.balance(bucket);
            let delta = changes.get(bucket);
            let updated = current + delta;
            if updated < Decimal::ZERO {
                return Err(BonusError::InsufficientBalance {
                    bucket: bucket.to_string(),
                    required: -delta,
                    available: current,
                });
            }
            match bucket {
                WalletBucket::Deposit => next.deposit_balance = updated,
                WalletBucket::Withdrawable => next.withdrawable_balance = updated,
                WalletBucket::BonusLocked => next.bonus_locked = updated,
                WalletBucket::BonusUnlocked => next.bonus_unlocked = updated,
            }
        }
        Ok(next)
    }

    /// 规则引擎 `wallet` 数据域
    pub fn to_context_value(&self) -> serde_json::Value {
        serde_json::json!({
            "deposit_balance": self.deposit_balance,
            "withdrawable_balance": self.withdrawable_balance,
            "bonus_locked": self.bonus_locked,
            "bonus_unlocked": self.bonus_unlocked,
            "spendable": self.spendable(),
        })
    }
}

/// 钱包交易记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletTransaction {
    pub id: i64,
    pub user_id: String,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    /// 上游业务单号，(user_id, tx_type, reference) 唯一
    pub reference: String,
    /// 退款对应的原下注单号
    #[sqlx(default)]
    pub original_reference: Option<String>,
    pub bucket_changes: Json<BucketChanges>,
    pub metadata: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// 待写入的钱包交易
#[derive(Debug, Clone)]
pub struct NewWalletTransaction {
    pub user_id: String,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    pub reference: String,
    pub original_reference: Option<String>,
    pub metadata: serde_json::Value,
}

/// 计算交易对各分账户的变动
///
/// - DEPOSIT：进入充值本金
/// - WIN：进入可提现余额
/// - WITHDRAWAL：只能从可提现余额扣除
/// - BET：依次扣充值本金、可提现余额、可用奖金，锁定奖金不可下注
/// - REFUND：原下注变动原样冲回
pub fn plan_bucket_changes(
    wallet: &Wallet,
    tx_type: TransactionType,
    amount: Decimal,
    original: Option<&WalletTransaction>,
) -> Result<BucketChanges> {
    if amount <= Decimal::ZERO {
        return Err(BonusError::InvalidAmount(format!(
            "{tx_type} 金额必须为正数: {amount}"
        )));
    }

    match tx_type {
        TransactionType::Deposit => Ok(BucketChanges::single(WalletBucket::Deposit, amount)),
        TransactionType::Win => Ok(BucketChanges::single(WalletBucket::Withdrawable, amount)),
        TransactionType::Withdrawal => {
            let available = wallet.withdrawable_balance;
            if available < amount {
                return Err(BonusError::InsufficientBalance {
                    bucket: WalletBucket::Withdrawable.to_string(),
                    required: amount,
                    available,
                });
            }
            Ok(BucketChanges::single(WalletBucket::Withdrawable, -amount))
        }
        TransactionType::Bet => {
            if wallet.spendable() < amount {
                return Err(BonusError::InsufficientBalance {
                    bucket: "SPENDABLE".to_string(),
                    required: amount,
                    available: wallet.spendable(),
                });
            }

            let mut remaining = amount;
            let mut changes = BucketChanges::default();
            for bucket in [
                WalletBucket::Deposit,
                WalletBucket::Withdrawable,
                WalletBucket::BonusUnlocked,
            ] {
                let take = remaining.min(wallet.balance(bucket));
                if take > Decimal::ZERO {
                    *changes.bucket_mut(bucket) = -take;
                    remaining -= take;
                }
                if remaining.is_zero() {
                    break;
                }
            }
            Ok(changes)
        }
        TransactionType::Refund => {
            let original = original
                .filter(|tx| tx.tx_type == TransactionType::Bet)
                .ok_or_else(|| BonusError::TransactionNotFound {
                    reference: "<original bet>".to_string(),
                })?;

            if original.amount != amount {
                return Err(BonusError::InvalidAmount(format!(
                    "退款金额 {amount} 与原下注 {} 不一致",
                    original.amount
                )));
            }
            Ok(original.bucket_changes.negate())
        }
    }
}

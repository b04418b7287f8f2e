//! 奖金服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 活动状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    /// 草稿 - 配置中，不参与评估
    #[default]
    Draft,
    /// 进行中
    Active,
    /// 暂停 - 不再发放，已发放的奖金照常释放
    Paused,
    /// 已结束
    Ended,
}

/// 奖金发放方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BonusKind {
    /// 发放到锁定奖金，按释放计划逐步解锁
    Locked,
    /// 直接发放到可用奖金
    Unlocked,
}

/// 金额计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AmountType {
    /// 按基数的百分比
    Percentage,
    /// 固定金额
    Fixed,
}

/// 用户参与活动的状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageStatus {
    /// 奖金已发放，释放进行中
    #[default]
    Active,
    /// 所有阶段释放完毕
    Completed,
    /// 因提现等原因没收
    Forfeited,
    /// 超过有效期
    Expired,
}

impl UsageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// 钱包分账户
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletBucket {
    /// 充值本金
    Deposit,
    /// 可提现余额（派彩进入此处）
    Withdrawable,
    /// 锁定奖金，不可下注、不可提现
    BonusLocked,
    /// 已解锁奖金，可下注
    BonusUnlocked,
}

impl WalletBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdrawable => "WITHDRAWABLE",
            Self::BonusLocked => "BONUS_LOCKED",
            Self::BonusUnlocked => "BONUS_UNLOCKED",
        }
    }
}

impl std::fmt::Display for WalletBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 钱包交易类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Bet,
    Win,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdrawal => "WITHDRAWAL",
            Self::Bet => "BET",
            Self::Win => "WIN",
            Self::Refund => "REFUND",
        }
    }

    /// 对应发布的领域事件类型
    pub fn event_type(&self) -> casino_shared::events::EventType {
        use casino_shared::events::EventType;
        match self {
            Self::Deposit => EventType::Deposit,
            Self::Withdrawal => EventType::Withdrawal,
            Self::Bet => EventType::Bet,
            Self::Win => EventType::Win,
            Self::Refund => EventType::Refund,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 奖金流水类型
///
/// 与 `(user_id, campaign_id, usage_seq, stage)` 一起构成幂等键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BonusReleaseType {
    /// 直接发放到可用奖金（+unlocked）
    Unlocked,
    /// 初始发放到锁定奖金（+locked）
    Locked,
    /// 分阶段释放（-locked, +unlocked）
    Stage,
    /// 没收或过期（-locked）
    Forfeit,
}

impl BonusReleaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlocked => "UNLOCKED",
            Self::Locked => "LOCKED",
            Self::Stage => "STAGE",
            Self::Forfeit => "FORFEIT",
        }
    }
}

impl std::fmt::Display for BonusReleaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 没收原因，写入奖金流水的 reason 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForfeitReason {
    Withdrawal,
    Expired,
}

impl ForfeitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Withdrawal => "WITHDRAWAL",
            Self::Expired => "EXPIRED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_serialization() {
        assert_eq!(
            serde_json::to_string(&CampaignStatus::Active).unwrap(),
            "\"ACTIVE\""
        );
        assert_eq!(
            serde_json::to_string(&WalletBucket::BonusUnlocked).unwrap(),
            "\"BONUS_UNLOCKED\""
        );
        let kind: BonusKind = serde_json::from_str("\"LOCKED\"").unwrap();
        assert_eq!(kind, BonusKind::Locked);
        let amount: AmountType = serde_json::from_str("\"PERCENTAGE\"").unwrap();
        assert_eq!(amount, AmountType::Percentage);
    }

    #[test]
    fn test_usage_status_terminal() {
        assert!(!UsageStatus::Active.is_terminal());
        assert!(UsageStatus::Completed.is_terminal());
        assert!(UsageStatus::Forfeited.is_terminal());
        assert!(UsageStatus::Expired.is_terminal());
    }

    #[test]
    fn test_transaction_type_event_mapping() {
        use casino_shared::events::EventType;
        assert_eq!(TransactionType::Bet.event_type(), EventType::Bet);
        assert_eq!(TransactionType::Withdrawal.event_type(), EventType::Withdrawal);
        assert_eq!(TransactionType::Refund.to_string(), "REFUND");
    }
}

//! 奖金服务领域模型
//!
//! 包含活动配置、用户参与进度、钱包与奖金流水

pub mod bonus_transaction;
pub mod campaign;
pub mod enums;
pub mod usage;
pub mod wallet;

// 重新导出常用类型
pub use bonus_transaction::{BonusTransaction, BonusTransactionKey, NewBonusTransaction};
pub use campaign::{AmountConfig, Campaign, ReleaseStage};
pub use enums::{
    AmountType, BonusKind, BonusReleaseType, CampaignStatus, ForfeitReason, TransactionType,
    UsageStatus, WalletBucket,
};
pub use usage::{CampaignUsage, UserCampaignUsage};
pub use wallet::{BucketChanges, NewWalletTransaction, Wallet, WalletTransaction, plan_bucket_changes};

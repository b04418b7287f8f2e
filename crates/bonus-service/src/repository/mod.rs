//! 数据访问层
//!
//! 活动、钱包、奖金流水存放在 PostgreSQL，用户活动使用记录存放在 Redis。
//! 事务控制在仓储内完成，服务层只依赖 trait 以支持 mock 测试。

mod bonus_ledger_repo;
mod campaign_repo;
mod processed_store;
mod traits;
mod usage_store;
mod wallet_repo;

pub use bonus_ledger_repo::BonusLedgerRepository;
pub use campaign_repo::CampaignRepository;
pub use processed_store::RedisProcessedEventStore;
pub use traits::*;
pub use usage_store::RedisUsageStore;
pub use wallet_repo::WalletRepository;

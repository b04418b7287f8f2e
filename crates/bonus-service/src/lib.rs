//! 奖金活动引擎
//!
//! 订阅钱包与账户领域事件，按活动配置判定资格、发放锁定或可用奖金，
//! 并根据流水进度分阶段释放锁定奖金。
//!
//! ## 模块结构
//!
//! - `models`: 活动、用户活动进度、钱包、奖金流水
//! - `repository`: PostgreSQL 与 Redis 存储
//! - `service`: 活动资格、奖金发放与释放、钱包交易
//! - `processor`: 按事件类型执行的规则处理器
//! - `engine`: `EventProcessor` 实现
//! - `consumer`: Redis pub/sub 消费循环
//! - `publisher`: 领域事件与通知的发布

pub mod consumer;
pub mod engine;
pub mod error;
pub mod models;
pub mod processor;
pub mod publisher;
pub mod repository;
pub mod service;

pub use consumer::{BonusEventConsumer, HandleOutcome, MessageHandler};
pub use engine::BonusEventProcessor;
pub use error::{BonusError, Result};
pub use processor::{ProcessingState, ProcessorRegistry, RuleProcessor};
pub use publisher::{EventPublisher, RedisEventPublisher};
pub use service::{BonusReleaseService, BonusService, CampaignService, WalletService};

//! 服务层
//!
//! 活动资格判定、奖金发放与释放、钱包交易记录

mod bonus_service;
mod campaign_service;
mod release_service;
mod wallet_service;

pub use bonus_service::{BonusService, CreditOutcome, round_amount};
pub use campaign_service::{CampaignService, Eligibility, IneligibleReason};
pub use release_service::BonusReleaseService;
pub use wallet_service::WalletService;

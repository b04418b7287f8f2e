//! 活动服务
//!
//! 负责活动列表的内存缓存、用户资格判定，以及用户活动使用记录的读写。
//!
//! ## 缓存刷新策略
//!
//! 采用 TTL 机制自动刷新，`invalidate` 供运营变更活动后通过重载通道触发。
//! 刷新失败时继续使用旧列表，首次加载失败才向上返回错误。

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use casino_shared::events::EventType;
use casino_shared::observability::metrics;
use chrono::{DateTime, Utc};
use rule_engine::{EvaluationContext, RuleExecutor};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::models::{Campaign, CampaignUsage, UserCampaignUsage};
use crate::repository::{CampaignRepositoryTrait, CampaignUsageStore};

/// 资格判定结果
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible { matched_rules: Vec<String> },
    Ineligible(IneligibleReason),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible { .. })
    }
}

/// 不满足资格的原因，按判定顺序排列
#[derive(Debug, Clone, PartialEq)]
pub enum IneligibleReason {
    CampaignNotActive,
    OutsideWindow,
    NotInAllowList,
    UsageLimitReached { times_used: i32, max: i32 },
    /// 上一轮奖金仍在释放中
    AlreadyActive,
    RulesNotMatched,
    RuleError(String),
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CampaignNotActive => write!(f, "活动未开启"),
            Self::OutsideWindow => write!(f, "不在活动时间内"),
            Self::NotInAllowList => write!(f, "用户不在白名单内"),
            Self::UsageLimitReached { times_used, max } => {
                write!(f, "已达参与上限 ({times_used}/{max})")
            }
            Self::AlreadyActive => write!(f, "上一轮奖金仍在释放中"),
            Self::RulesNotMatched => write!(f, "资格条件不满足"),
            Self::RuleError(e) => write!(f, "资格条件评估出错: {e}"),
        }
    }
}

#[derive(Default)]
struct CampaignCache {
    campaigns: Arc<Vec<Campaign>>,
    last_refresh: Option<Instant>,
}

pub struct CampaignService {
    campaign_repo: Arc<dyn CampaignRepositoryTrait>,
    usage_store: Arc<dyn CampaignUsageStore>,
    cache: RwLock<CampaignCache>,
    cache_ttl: Duration,
    executor: RuleExecutor,
}

impl CampaignService {
    pub fn new(
        campaign_repo: Arc<dyn CampaignRepositoryTrait>,
        usage_store: Arc<dyn CampaignUsageStore>,
        cache_ttl_seconds: u64,
    ) -> Self {
        Self {
            campaign_repo,
            usage_store,
            cache: RwLock::new(CampaignCache::default()),
            cache_ttl: Duration::from_secs(cache_ttl_seconds),
            executor: RuleExecutor::new(),
        }
    }

    /// 获取活动列表，过期时自动刷新
    pub async fn load_campaigns(&self) -> Result<Arc<Vec<Campaign>>> {
        let (stale, loaded_once) = {
            let cache = self.cache.read().await;
            match cache.last_refresh {
                Some(at) => (at.elapsed() > self.cache_ttl, true),
                None => (true, false),
            }
        };

        if stale
            && let Err(e) = self.refresh().await
        {
            if !loaded_once {
                return Err(e);
            }
            warn!(error = %e, "刷新活动缓存失败，使用过期缓存继续服务");
        }

        Ok(self.cache.read().await.campaigns.clone())
    }

    /// 从仓储重新加载活动
    ///
    /// 配置无效的活动跳过并告警，不影响其他活动。返回加载的活动数。
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize> {
        let start = Instant::now();
        let loaded = self.campaign_repo.list_campaigns().await?;
        let total = loaded.len();

        let mut campaigns: Vec<Campaign> = loaded
            .into_iter()
            .filter(|c| match c.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(campaign_id = c.id, error = %e, "活动配置无效，已跳过");
                    false
                }
            })
            .collect();
        campaigns.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let count = campaigns.len();
        {
            let mut cache = self.cache.write().await;
            cache.campaigns = Arc::new(campaigns);
            cache.last_refresh = Some(Instant::now());
        }

        info!(
            total,
            valid = count,
            duration_ms = start.elapsed().as_millis() as u64,
            "活动缓存已刷新"
        );
        Ok(count)
    }

    /// 下次访问时强制刷新
    pub async fn invalidate(&self) {
        self.cache.write().await.last_refresh = None;
        info!("活动缓存已失效");
    }

    /// 由该事件类型触发、当前处于进行中且在时间窗口内的活动
    pub async fn campaigns_triggered_by(
        &self,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> Result<Vec<Campaign>> {
        let campaigns = self.load_campaigns().await?;
        Ok(campaigns
            .iter()
            .filter(|c| c.is_active() && c.trigger_event == event_type && c.is_within_window(now))
            .cloned()
            .collect())
    }

    /// 按 ID 获取活动，包括已暂停和已结束的活动
    pub async fn get_campaign(&self, campaign_id: i64) -> Result<Option<Campaign>> {
        let campaigns = self.load_campaigns().await?;
        if let Some(campaign) = campaigns.iter().find(|c| c.id == campaign_id) {
            return Ok(Some(campaign.clone()));
        }

        // 缓存之后新建的活动
        let campaign = self.campaign_repo.get_campaign(campaign_id).await?;
        Ok(campaign.filter(|c| c.validate().is_ok()))
    }

    /// 判定用户是否可以参与活动
    ///
    /// 判定顺序：活动状态 -> 时间窗口 -> 白名单 -> 参与次数 -> 是否有进行中的一轮 -> 资格条件
    pub fn check_eligibility(
        &self,
        campaign: &Campaign,
        user_id: &str,
        usage: Option<&CampaignUsage>,
        context: &EvaluationContext,
        now: DateTime<Utc>,
    ) -> Eligibility {
        if !campaign.is_active() {
            return Eligibility::Ineligible(IneligibleReason::CampaignNotActive);
        }
        if !campaign.is_within_window(now) {
            return Eligibility::Ineligible(IneligibleReason::OutsideWindow);
        }
        if !campaign.allows_user(user_id) {
            return Eligibility::Ineligible(IneligibleReason::NotInAllowList);
        }

        if let Some(usage) = usage {
            if usage.times_used >= campaign.max_usage_per_user {
                return Eligibility::Ineligible(IneligibleReason::UsageLimitReached {
                    times_used: usage.times_used,
                    max: campaign.max_usage_per_user,
                });
            }
            if usage.is_active() {
                return Eligibility::Ineligible(IneligibleReason::AlreadyActive);
            }
        }

        let eligibility = match self.executor.execute(&campaign.eligibility, context) {
            Ok(result) if result.matched => Eligibility::Eligible {
                matched_rules: result.matched_conditions,
            },
            Ok(_) => Eligibility::Ineligible(IneligibleReason::RulesNotMatched),
            Err(e) => {
                warn!(campaign_id = campaign.id, user_id, error = %e, "资格条件评估出错，按不满足处理");
                Eligibility::Ineligible(IneligibleReason::RuleError(e.to_string()))
            }
        };

        metrics::record_rule_evaluation("eligibility", eligibility.is_eligible());
        debug!(campaign_id = campaign.id, user_id, ?eligibility, "资格判定完成");
        eligibility
    }

    /// 读取用户活动使用记录，不存在时返回空记录
    pub async fn get_user_usage(&self, user_id: &str) -> Result<UserCampaignUsage> {
        let usage = self.usage_store.load(user_id).await?;
        Ok(usage.unwrap_or_else(|| UserCampaignUsage::new(user_id)))
    }

    pub async fn save_user_usage(&self, usage: &UserCampaignUsage) -> Result<()> {
        self.usage_store.save(usage).await
    }
}

//! 用户活动使用记录的 Redis 存储

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use casino_shared::cache::{Cache, CacheKey};
use tracing::instrument;

use super::traits::CampaignUsageStore;
use crate::error::Result;
use crate::models::UserCampaignUsage;

/// 以单个 JSON 存放用户全部活动记录，每次保存刷新 TTL
pub struct RedisUsageStore {
    cache: Arc<Cache>,
    ttl: Duration,
}

impl RedisUsageStore {
    pub fn new(cache: Arc<Cache>, ttl_days: u64) -> Self {
        Self {
            cache,
            ttl: Duration::from_secs(ttl_days * 24 * 3600),
        }
    }
}

#[async_trait]
impl CampaignUsageStore for RedisUsageStore {
    #[instrument(skip(self))]
    async fn load(&self, user_id: &str) -> Result<Option<UserCampaignUsage>> {
        let usage = self
            .cache
            .get::<UserCampaignUsage>(&CacheKey::campaign_usage(user_id))
            .await?;
        Ok(usage)
    }

    #[instrument(skip(self, usage), fields(user_id = %usage.user_id))]
    async fn save(&self, usage: &UserCampaignUsage) -> Result<()> {
        self.cache
            .set(&CacheKey::campaign_usage(&usage.user_id), usage, self.ttl)
            .await?;
        Ok(())
    }
}

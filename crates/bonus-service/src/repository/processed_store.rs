//! 事件幂等标记的 Redis 存储

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use casino_shared::cache::{Cache, CacheKey};
use tracing::debug;

use super::traits::ProcessedEventStore;
use crate::error::Result;

pub struct RedisProcessedEventStore {
    cache: Arc<Cache>,
    ttl: Duration,
}

impl RedisProcessedEventStore {
    pub fn new(cache: Arc<Cache>, ttl_hours: u64) -> Self {
        Self {
            cache,
            ttl: Duration::from_secs(ttl_hours * 3600),
        }
    }
}

#[async_trait]
impl ProcessedEventStore for RedisProcessedEventStore {
    async fn is_processed(&self, event_id: &str) -> Result<bool> {
        let exists = self.cache.exists(&CacheKey::processed_event(event_id)).await?;
        if exists {
            debug!(event_id, "事件已处理，跳过");
        }
        Ok(exists)
    }

    async fn mark_processed(&self, event_id: &str) -> Result<bool> {
        let created = self
            .cache
            .set_nx(&CacheKey::processed_event(event_id), &"1", self.ttl)
            .await?;
        debug!(event_id, created, "事件已标记为已处理");
        Ok(created)
    }
}

//! Redis 缓存管理模块
//!
//! 提供 Redis 连接管理和常用缓存操作封装。用户活动使用记录、事件幂等标记、
//! 设备推送令牌都通过这里读写。

use crate::config::RedisConfig;
use crate::error::{CasinoError, Result};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{info, instrument};

/// Redis 缓存客户端
#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    /// 创建 Redis 客户端
    ///
    /// 只解析 URL，不建立连接；首次执行命令时才会连接
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self { client })
    }

    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(CasinoError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(CasinoError::from)
    }

    /// 获取 JSON 值
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(key).await?;

        match value {
            Some(v) => {
                let parsed: T = serde_json::from_str(&v).map_err(|e| {
                    CasinoError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// 写入 JSON 值并设置 TTL
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)
            .map_err(|e| CasinoError::Internal(format!("Cache serialization error: {}", e)))?;

        let _: () = conn.set_ex(key, serialized, ttl.as_secs()).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// 检查键是否存在
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    /// 原子性地仅在 key 不存在时设置值，并指定 TTL
    ///
    /// 基于 Redis SET NX EX 实现，返回 true 表示设置成功（key 之前不存在）。
    pub async fn set_nx<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)
            .map_err(|e| CasinoError::Internal(format!("Cache serialization error: {}", e)))?;

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(serialized)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    /// 集合成员（设备令牌等）
    #[instrument(skip(self))]
    pub async fn members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.get_conn().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    /// 从集合移除成员，返回是否确实移除
    pub async fn remove_member(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    /// 设置过期时间
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }
}

/// 缓存键生成器
pub struct CacheKey;

impl CacheKey {
    /// 用户所有活动的使用记录（单个 JSON）
    pub fn campaign_usage(user_id: &str) -> String {
        format!("campaign:usage:{}", user_id)
    }

    /// 奖金引擎的事件幂等标记
    pub fn processed_event(event_id: &str) -> String {
        format!("event:bonus:processed:{}", event_id)
    }

    /// 用户已注册的推送设备令牌集合
    pub fn device_tokens(user_id: &str) -> String {
        format!("device:tokens:{}", user_id)
    }

    /// 通道对应的死信列表
    pub fn dead_letter(channel: &str) -> String {
        format!("casino:dlq:{}", channel)
    }
}

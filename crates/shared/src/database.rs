//! 数据库连接管理模块
//!
//! 活动、钱包与奖金流水都存放在同一个 PostgreSQL 库中。服务启动时数据库可能尚未就绪，
//! 建立连接池按退避策略重试，之后执行服务自带的迁移。

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::{CasinoError, Result};
use crate::retry::{RetryPolicy, retry_with_policy};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 按默认退避策略建立连接池
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        Self::connect_with_policy(config, &RetryPolicy::default()).await
    }

    #[instrument(skip_all, fields(max_connections = config.max_connections))]
    pub async fn connect_with_policy(config: &DatabaseConfig, policy: &RetryPolicy) -> Result<Self> {
        let options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        let pool = retry_with_policy(policy, "database_connect", CasinoError::is_retryable, || {
            let options = options.clone();
            async move { options.connect(&config.url).await.map_err(CasinoError::from) }
        })
        .await?;

        info!("数据库连接池已建立");
        Ok(Self { pool })
    }

    /// 执行迁移，已执行过的版本跳过
    pub async fn run_migrations(&self, migrator: &Migrator) -> Result<()> {
        migrator.run(&self.pool).await?;
        info!(migrations = migrator.iter().count(), "数据库迁移已完成");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }
}

//! 活动仓储
//!
//! 活动配置由运营后台写入，引擎侧只读

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::CampaignRepositoryTrait;
use crate::error::Result;
use crate::models::Campaign;

const CAMPAIGN_COLUMNS: &str = r#"
    id, name, description, status, trigger_event, start_at, end_at,
    eligibility, allowed_users, max_usage_per_user, bonus_kind, bonus,
    release_schedule, bonus_validity_days, forfeit_on_withdrawal, priority,
    created_at, updated_at
"#;

pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 列出全部非草稿活动
    ///
    /// 已暂停、已结束的活动仍需加载，其进行中的锁定奖金照常释放
    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status <> 'DRAFT' ORDER BY priority DESC, id ASC"
        );
        let campaigns = sqlx::query_as::<_, Campaign>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(campaigns)
    }

    pub async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1");
        let campaign = sqlx::query_as::<_, Campaign>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(campaign)
    }
}

#[async_trait]
impl CampaignRepositoryTrait for CampaignRepository {
    async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        self.list_campaigns().await
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        self.get_campaign(id).await
    }
}

//! 奖金流水仓储
//!
//! 流水写入与钱包奖金分账户调整在同一事务中完成。唯一约束
//! `(user_id, campaign_id, release_type, usage_seq, stage)` 是最终的幂等保障。

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::traits::{BonusLedgerOutcome, BonusLedgerRepositoryTrait};
use super::wallet_repo::WalletRepository;
use crate::error::{BonusError, Result};
use crate::models::{BonusTransaction, BonusTransactionKey, NewBonusTransaction};

const BONUS_TX_COLUMNS: &str = r#"
    id, user_id, campaign_id, release_type, usage_seq, stage, amount,
    source_event_id, reason, created_at
"#;

pub struct BonusLedgerRepository {
    pool: PgPool,
}

impl BonusLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_bonus_transaction(
        &self,
        key: &BonusTransactionKey,
    ) -> Result<Option<BonusTransaction>> {
        let sql = format!(
            r#"
            SELECT {BONUS_TX_COLUMNS}
            FROM bonus_transactions
            WHERE user_id = $1 AND campaign_id = $2 AND release_type = $3
              AND usage_seq = $4 AND stage = $5
            "#
        );
        let tx = sqlx::query_as::<_, BonusTransaction>(&sql)
            .bind(&key.user_id)
            .bind(key.campaign_id)
            .bind(key.release_type)
            .bind(key.usage_seq)
            .bind(key.stage)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tx)
    }

    /// 落账一笔奖金变动
    ///
    /// 插入冲突时回滚并返回已有流水；锁定奖金不足时返回余额不足，不写入任何数据
    #[instrument(skip(self, movement), fields(key = %movement.key, amount = %movement.amount))]
    pub async fn apply_bonus_movement(
        &self,
        movement: &NewBonusTransaction,
    ) -> Result<BonusLedgerOutcome> {
        let key = &movement.key;
        let mut tx = self.pool.begin().await?;

        let wallet = WalletRepository::lock_wallet_in_tx(&mut tx, &key.user_id).await?;

        let sql = format!(
            r#"
            INSERT INTO bonus_transactions
                (user_id, campaign_id, release_type, usage_seq, stage, amount, source_event_id, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, campaign_id, release_type, usage_seq, stage) DO NOTHING
            RETURNING {BONUS_TX_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, BonusTransaction>(&sql)
            .bind(&key.user_id)
            .bind(key.campaign_id)
            .bind(key.release_type)
            .bind(key.usage_seq)
            .bind(key.stage)
            .bind(movement.amount)
            .bind(&movement.source_event_id)
            .bind(&movement.reason)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(inserted) = inserted else {
            tx.rollback().await?;
            debug!("奖金流水已存在，按幂等返回");
            let existing = self.find_bonus_transaction(key).await?.ok_or_else(|| {
                BonusError::Internal(format!("奖金流水冲突但查询不到已有记录: {key}"))
            })?;
            return Ok(BonusLedgerOutcome::Duplicate(existing));
        };

        let changes = key.release_type.bucket_changes(movement.amount);
        let next_wallet = wallet.apply(&changes)?;
        WalletRepository::update_wallet_in_tx(&mut tx, &next_wallet).await?;

        tx.commit().await?;

        Ok(BonusLedgerOutcome::Applied(inserted))
    }

    pub async fn list_cycle(
        &self,
        user_id: &str,
        campaign_id: i64,
        usage_seq: i32,
    ) -> Result<Vec<BonusTransaction>> {
        let sql = format!(
            r#"
            SELECT {BONUS_TX_COLUMNS}
            FROM bonus_transactions
            WHERE user_id = $1 AND campaign_id = $2 AND usage_seq = $3
            ORDER BY id ASC
            "#
        );
        let txs = sqlx::query_as::<_, BonusTransaction>(&sql)
            .bind(user_id)
            .bind(campaign_id)
            .bind(usage_seq)
            .fetch_all(&self.pool)
            .await?;
        Ok(txs)
    }
}

#[async_trait]
impl BonusLedgerRepositoryTrait for BonusLedgerRepository {
    async fn find_bonus_transaction(
        &self,
        key: &BonusTransactionKey,
    ) -> Result<Option<BonusTransaction>> {
        self.find_bonus_transaction(key).await
    }

    async fn apply_bonus_movement(
        &self,
        movement: &NewBonusTransaction,
    ) -> Result<BonusLedgerOutcome> {
        self.apply_bonus_movement(movement).await
    }

    async fn list_cycle(
        &self,
        user_id: &str,
        campaign_id: i64,
        usage_seq: i32,
    ) -> Result<Vec<BonusTransaction>> {
        self.list_cycle(user_id, campaign_id, usage_seq).await
    }
}

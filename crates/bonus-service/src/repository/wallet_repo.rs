//! 钱包仓储
//!
//! 钱包余额与交易流水在同一事务中写入，钱包行通过 `FOR UPDATE` 加锁串行化同一用户的并发交易。

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument};

use super::traits::{WalletRepositoryTrait, WalletTxOutcome};
use crate::error::{BonusError, Result};
use crate::models::{
    NewWalletTransaction, TransactionType, Wallet, WalletTransaction, plan_bucket_changes,
};

const WALLET_TX_COLUMNS: &str = r#"
    id, user_id, tx_type, amount, reference, original_reference,
    bucket_changes, metadata, created_at
"#;

pub struct WalletRepository {
    pool: PgPool,
}

impl WalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_wallet(&self, user_id: &str) -> Result<Wallet> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT user_id, deposit_balance, withdrawable_balance, bonus_locked, bonus_unlocked
            FROM wallets
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet.unwrap_or_else(|| Wallet::empty(user_id)))
    }

    /// 在事务中锁定钱包，不存在时先创建零余额钱包
    pub async fn lock_wallet_in_tx(conn: &mut PgConnection, user_id: &str) -> Result<Wallet> {
        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut *conn)
            .await?;

        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT user_id, deposit_balance, withdrawable_balance, bonus_locked, bonus_unlocked
            FROM wallets
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(wallet)
    }

    /// 在事务中写回钱包余额
    pub async fn update_wallet_in_tx(conn: &mut PgConnection, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wallets
            SET deposit_balance = $2,
                withdrawable_balance = $3,
                bonus_locked = $4,
                bonus_unlocked = $5,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(&wallet.user_id)
        .bind(wallet.deposit_balance)
        .bind(wallet.withdrawable_balance)
        .bind(wallet.bonus_locked)
        .bind(wallet.bonus_unlocked)
        .execute(conn)
        .await?;

        Ok(())
    }

    async fn find_transaction_in_tx(
        conn: &mut PgConnection,
        user_id: &str,
        tx_type: TransactionType,
        reference: &str,
    ) -> Result<Option<WalletTransaction>> {
        let sql = format!(
            "SELECT {WALLET_TX_COLUMNS} FROM wallet_transactions WHERE user_id = $1 AND tx_type = $2 AND reference = $3"
        );
        let tx = sqlx::query_as::<_, WalletTransaction>(&sql)
            .bind(user_id)
            .bind(tx_type)
            .bind(reference)
            .fetch_optional(conn)
            .await?;
        Ok(tx)
    }

    async fn refund_exists_in_tx(
        conn: &mut PgConnection,
        user_id: &str,
        original_reference: &str,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM wallet_transactions
                WHERE user_id = $1 AND tx_type = 'REFUND' AND original_reference = $2
            )
            "#,
        )
        .bind(user_id)
        .bind(original_reference)
        .fetch_one(conn)
        .await?;
        Ok(exists)
    }

    pub async fn find_transaction(
        &self,
        user_id: &str,
        tx_type: TransactionType,
        reference: &str,
    ) -> Result<Option<WalletTransaction>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_transaction_in_tx(&mut conn, user_id, tx_type, reference).await
    }

    pub async fn count_transactions(&self, user_id: &str, tx_type: TransactionType) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM wallet_transactions WHERE user_id = $1 AND tx_type = $2",
        )
        .bind(user_id)
        .bind(tx_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// 落账一笔钱包交易
    ///
    /// 流程：锁定钱包 -> 幂等检查 -> 查找原下注（退款） -> 计算变动 -> 写回余额 -> 写入流水
    #[instrument(skip(self, new_tx), fields(user_id = %new_tx.user_id, tx_type = %new_tx.tx_type, reference = %new_tx.reference))]
    pub async fn apply_transaction(&self, new_tx: &NewWalletTransaction) -> Result<WalletTxOutcome> {
        let mut tx = self.pool.begin().await?;

        let wallet = Self::lock_wallet_in_tx(&mut tx, &new_tx.user_id).await?;

        if let Some(existing) =
            Self::find_transaction_in_tx(&mut tx, &new_tx.user_id, new_tx.tx_type, &new_tx.reference)
                .await?
        {
            debug!("交易已存在，按幂等返回");
            tx.rollback().await?;
            return Ok(WalletTxOutcome::Duplicate(existing));
        }

        let original = match (new_tx.tx_type, new_tx.original_reference.as_deref()) {
            (TransactionType::Refund, Some(original_ref)) => {
                if Self::refund_exists_in_tx(&mut tx, &new_tx.user_id, original_ref).await? {
                    return Err(BonusError::Validation(format!(
                        "下注已退款: {original_ref}"
                    )));
                }
                let bet = Self::find_transaction_in_tx(
                    &mut tx,
                    &new_tx.user_id,
                    TransactionType::Bet,
                    original_ref,
                )
                .await?
                .ok_or_else(|| BonusError::TransactionNotFound {
                    reference: original_ref.to_string(),
                })?;
                Some(bet)
            }
            (TransactionType::Refund, None) => {
                return Err(BonusError::Validation(
                    "退款必须指定原下注单号".to_string(),
                ));
            }
            _ => None,
        };

        let changes = plan_bucket_changes(&wallet, new_tx.tx_type, new_tx.amount, original.as_ref())?;
        let next_wallet = wallet.apply(&changes)?;

        Self::update_wallet_in_tx(&mut tx, &next_wallet).await?;

        let sql = format!(
            r#"
            INSERT INTO wallet_transactions
                (user_id, tx_type, amount, reference, original_reference, bucket_changes, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {WALLET_TX_COLUMNS}
            "#
        );
        let transaction = sqlx::query_as::<_, WalletTransaction>(&sql)
            .bind(&new_tx.user_id)
            .bind(new_tx.tx_type)
            .bind(new_tx.amount)
            .bind(&new_tx.reference)
            .bind(&new_tx.original_reference)
            .bind(Json(changes))
            .bind(Json(&new_tx.metadata))
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(WalletTxOutcome::Applied {
            transaction,
            wallet: next_wallet,
        })
    }
}

#[async_trait]
impl WalletRepositoryTrait for WalletRepository {
    async fn get_wallet(&self, user_id: &str) -> Result<Wallet> {
        self.get_wallet(user_id).await
    }

    async fn find_transaction(
        &self,
        user_id: &str,
        tx_type: TransactionType,
        reference: &str,
    ) -> Result<Option<WalletTransaction>> {
        self.find_transaction(user_id, tx_type, reference).await
    }

    async fn count_transactions(&self, user_id: &str, tx_type: TransactionType) -> Result<i64> {
        self.count_transactions(user_id, tx_type).await
    }

    async fn apply_transaction(&self, tx: &NewWalletTransaction) -> Result<WalletTxOutcome> {
        self.apply_transaction(tx).await
    }
}

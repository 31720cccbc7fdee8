use chrono::Utc;
use sqlx::SqlitePool;
use tracing::warn;

use super::{NewStagedOperation, StagedOperation};
use crate::error::AppResult;

/// Staging repository - the clearable table of pending payment operations.
///
/// Single-writer contract: callers serialize access through the payment
/// cycle lock; this type does not lock on its own.
pub struct StagingRepository {
    pub pool: SqlitePool,
}

impl StagingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Drop any prior staged set. Called at the start of every build; a
    /// stale set left by an abandoned cycle is logged before it goes.
    pub async fn clear(&self) -> AppResult<()> {
        let stale = self.count().await?;
        if stale > 0 {
            warn!("clearing {} stale staged operation(s)", stale);
        }

        sqlx::query("DELETE FROM staged_operations")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn stage(&self, op: &NewStagedOperation) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO staged_operations
                (campaign_id, amount, destination_public_key, operation_type, staged_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(op.campaign_id)
        .bind(op.amount)
        .bind(&op.destination_public_key)
        .bind(op.operation_type)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The current in-flight batch, in staging order.
    pub async fn all(&self) -> AppResult<Vec<StagedOperation>> {
        let ops = sqlx::query_as::<_, StagedOperation>(
            r#"
            SELECT id, campaign_id, amount, destination_public_key, operation_type, staged_at
            FROM staged_operations
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ops)
    }

    pub async fn count(&self) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM staged_operations")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::OperationType;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn op(campaign_id: i64, amount: i64) -> NewStagedOperation {
        NewStagedOperation {
            campaign_id,
            amount,
            destination_public_key: "GDEST".to_string(),
            operation_type: OperationType::Fund,
        }
    }

    #[tokio::test]
    async fn clear_then_stage_replaces_prior_batch() {
        let repo = StagingRepository::new(test_pool().await);

        repo.stage(&op(1, 100)).await.unwrap();
        repo.stage(&op(2, 200)).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 2);

        repo.clear().await.unwrap();
        repo.stage(&op(3, 300)).await.unwrap();

        let batch = repo.all().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].campaign_id, 3);
        assert_eq!(batch[0].amount, 300);
    }
}

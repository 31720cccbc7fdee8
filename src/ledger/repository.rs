use std::collections::HashMap;

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};

use super::models::*;
use crate::error::AppResult;

/// Ledger-transaction repository - the append-only history of confirmed
/// payments. Donation totals derived here are THE source of truth for
/// settlement decisions.
pub struct LedgerRepository {
    pub pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ========== APPEND ==========

    /// Append a confirmed transaction inside an open database transaction,
    /// stamping the confirmation hash and commit time.
    pub async fn append_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        row: &NewLedgerTransaction,
        confirmation_hash: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_transactions
                (campaign_id, amount, sender_public_key, receiver_public_key,
                 operation_type, confirmation_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.campaign_id)
        .bind(row.amount)
        .bind(&row.sender_public_key)
        .bind(&row.receiver_public_key)
        .bind(row.operation_type)
        .bind(confirmation_hash)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Idempotency probe: has this (hash, campaign, operation) already been
    /// committed? Used to make reconciliation retries safe.
    pub async fn exists_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        confirmation_hash: &str,
        campaign_id: i64,
        operation_type: OperationType,
    ) -> AppResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM ledger_transactions
                WHERE confirmation_hash = ? AND campaign_id = ? AND operation_type = ?
            )
            "#,
        )
        .bind(confirmation_hash)
        .bind(campaign_id)
        .bind(operation_type)
        .fetch_one(&mut **tx)
        .await?;

        Ok(exists)
    }

    // ========== DONATION AGGREGATION ==========

    /// Total confirmed donations for one campaign.
    pub async fn total_donations(&self, campaign_id: i64) -> AppResult<i64> {
        let total = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT SUM(amount) FROM ledger_transactions
            WHERE campaign_id = ? AND operation_type = 'donation'
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0))
    }

    /// Donation totals per campaign, for enriching listings in one query.
    pub async fn donation_totals(&self) -> AppResult<HashMap<i64, i64>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT campaign_id, SUM(amount)
            FROM ledger_transactions
            WHERE operation_type = 'donation'
            GROUP BY campaign_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Donation totals per donor for one campaign - the shape a refund batch
    /// is assembled from (one refund operation per donor).
    pub async fn donations_by_donor(&self, campaign_id: i64) -> AppResult<Vec<DonorTotal>> {
        let rows = sqlx::query_as::<_, DonorTotal>(
            r#"
            SELECT campaign_id,
                   sender_public_key AS donor_public_key,
                   SUM(amount) AS total_donations
            FROM ledger_transactions
            WHERE campaign_id = ? AND operation_type = 'donation'
            GROUP BY sender_public_key
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// A donor's full donation history with confirmation hashes.
    pub async fn donation_history(&self, donor_public_key: &str) -> AppResult<Vec<DonationRecord>> {
        let rows = sqlx::query_as::<_, DonationRecord>(
            r#"
            SELECT t.campaign_id,
                   c.name AS campaign_name,
                   c.category,
                   t.amount,
                   t.confirmation_hash,
                   t.created_at
            FROM ledger_transactions t
            JOIN campaigns c ON t.campaign_id = c.id
            WHERE t.sender_public_key = ? AND t.operation_type = 'donation'
            ORDER BY t.created_at DESC
            "#,
        )
        .bind(donor_public_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// All rows committed under one confirmation hash, for operator
    /// inspection after a reconciliation failure.
    pub async fn by_confirmation_hash(&self, hash: &str) -> AppResult<Vec<LedgerTransaction>> {
        let rows = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT id, campaign_id, amount, sender_public_key, receiver_public_key,
                   operation_type, confirmation_hash, created_at
            FROM ledger_transactions
            WHERE confirmation_hash = ?
            ORDER BY id
            "#,
        )
        .bind(hash)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

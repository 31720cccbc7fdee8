use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use super::models::{Campaign, CampaignFilter, CampaignStatus, NewCampaign};
use crate::error::{AppError, AppResult};

/// Campaign repository - the durable campaign store.
///
/// Status transitions go through [`transition`](Self::transition), which is a
/// compare-and-set on the current status so concurrent sweeps cannot
/// double-apply a transition.
pub struct CampaignRepository {
    pub pool: SqlitePool,
}

impl CampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // ========== CREATE / UPDATE ==========

    pub async fn create(&self, campaign: NewCampaign) -> AppResult<Campaign> {
        let created_at = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO campaigns
                (owner_public_key, name, category, description, goal, deadline, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'active', ?)
            "#,
        )
        .bind(&campaign.owner_public_key)
        .bind(&campaign.name)
        .bind(campaign.category.to_lowercase())
        .bind(&campaign.description)
        .bind(campaign.goal)
        .bind(campaign.deadline)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("campaign {} created", id);

        self.get(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("campaign {} vanished after insert", id)))
    }

    /// Update editable fields. Permitted only while the campaign is still
    /// active, so settled outcomes stay immutable.
    pub async fn update_details(
        &self,
        id: i64,
        name: &str,
        category: &str,
        description: &str,
        goal: i64,
        deadline: chrono::DateTime<Utc>,
    ) -> AppResult<Campaign> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET name = ?, category = ?, description = ?, goal = ?, deadline = ?
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(name)
        .bind(category.to_lowercase())
        .bind(description)
        .bind(goal)
        .bind(deadline)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                Some(_) => Err(AppError::Validation(
                    "only active campaigns can be edited".to_string(),
                )),
                None => Err(AppError::NotFound(format!("campaign {} not found", id))),
            };
        }

        self.get(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("campaign {} vanished after update", id)))
    }

    // ========== READS ==========

    pub async fn get(&self, id: i64) -> AppResult<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, owner_public_key, name, category, description,
                   goal, deadline, status, created_at
            FROM campaigns
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(campaign)
    }

    pub async fn list(&self, filter: &CampaignFilter) -> AppResult<Vec<Campaign>> {
        let name_pattern = format!("%{}%", filter.name.as_deref().unwrap_or(""));
        let category_pattern = format!(
            "%{}%",
            filter.category.as_deref().unwrap_or("").to_lowercase()
        );
        let status_pattern = format!(
            "%{}%",
            filter.status.map(|s| s.as_str()).unwrap_or("")
        );

        let campaigns = sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, owner_public_key, name, category, description,
                   goal, deadline, status, created_at
            FROM campaigns
            WHERE name LIKE ? AND category LIKE ? AND status LIKE ?
            ORDER BY created_at DESC, status
            "#,
        )
        .bind(name_pattern)
        .bind(category_pattern)
        .bind(status_pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(campaigns)
    }

    pub async fn list_by_status(&self, status: CampaignStatus) -> AppResult<Vec<Campaign>> {
        let campaigns = sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, owner_public_key, name, category, description,
                   goal, deadline, status, created_at
            FROM campaigns
            WHERE status = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(campaigns)
    }

    pub async fn current_status(&self, id: i64) -> AppResult<Option<CampaignStatus>> {
        let status = sqlx::query_scalar::<_, CampaignStatus>(
            "SELECT status FROM campaigns WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    // ========== STATUS TRANSITIONS ==========

    /// Compare-and-set status transition. Returns `true` when the transition
    /// was applied, `false` when the campaign was not in `from` (already
    /// settled by another sweep, or unknown id).
    pub async fn transition(
        &self,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> AppResult<bool> {
        let result = sqlx::query("UPDATE campaigns SET status = ? WHERE id = ? AND status = ?")
            .bind(to)
            .bind(id)
            .bind(from)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Same compare-and-set, scoped to an open database transaction so a
    /// ledger insert and its status transition commit or roll back together.
    pub async fn transition_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> AppResult<bool> {
        let result = sqlx::query("UPDATE campaigns SET status = ? WHERE id = ? AND status = ?")
            .bind(to)
            .bind(id)
            .bind(from)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn status_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> AppResult<Option<CampaignStatus>> {
        let status = sqlx::query_scalar::<_, CampaignStatus>(
            "SELECT status FROM campaigns WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(status)
    }
}

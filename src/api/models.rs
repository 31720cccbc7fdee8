use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::campaigns::models::{funding_progress, Campaign, CampaignStatus};
use crate::error::{AppError, AppResult};
use crate::ledger::models::OperationType;
use crate::reconcile::ReconcileSummary;

/// Parse a user-supplied amount string into a positive integer.
/// Donations arrive as raw form/JSON strings; anything that is not a
/// positive integer is a validation failure.
pub fn parse_amount(raw: &str) -> AppResult<i64> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("'{}' is not a valid amount", raw)))?;

    if value <= 0 {
        return Err(AppError::Validation(format!(
            "'{}' is not a valid amount",
            raw
        )));
    }

    Ok(value)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCampaignRequest {
    pub owner_public_key: String,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(length(min = 1, max = 4000))]
    pub description: String,
    #[validate(range(min = 1))]
    pub goal: i64,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCampaignRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(length(min = 1, max = 4000))]
    pub description: String,
    #[validate(range(min = 1))]
    pub goal: i64,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct DonateRequest {
    pub donor_public_key: String,
    /// Raw amount string from the client; validated by [`parse_amount`].
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub operation_type: OperationType,
    pub campaign_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTransactionRequest {
    pub signed_envelope_xdr: String,
    pub submitter_public_key: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct CampaignListQuery {
    pub name: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
}

/// Campaign enriched with its pledged total for display.
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: i64,
    pub owner_public_key: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub goal: i64,
    pub deadline: DateTime<Utc>,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub total_donations: i64,
    pub funding_progress_pct: u32,
}

impl CampaignResponse {
    pub fn from_campaign(campaign: Campaign, total_donations: i64) -> Self {
        let funding_progress_pct = funding_progress(total_donations, campaign.goal);
        Self {
            id: campaign.id,
            owner_public_key: campaign.owner_public_key,
            name: campaign.name,
            category: campaign.category,
            description: campaign.description,
            goal: campaign.goal,
            deadline: campaign.deadline,
            status: campaign.status,
            created_at: campaign.created_at,
            total_donations,
            funding_progress_pct,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub campaign_id: i64,
    pub status: CampaignStatus,
}

#[derive(Debug, Serialize)]
pub struct SubmitTransactionResponse {
    pub successful: bool,
    pub hash: String,
    pub reconciliation: ReconcileSummary,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use super::models::*;
use crate::{
    campaigns::{
        models::{CampaignFilter, CampaignStatus, NewCampaign},
        repository::CampaignRepository,
    },
    config::Config,
    error::{AppError, AppResult},
    ledger::{
        models::{DonationRecord, DonorTotal, OperationType},
        repository::LedgerRepository,
    },
    payments::{builder::PaymentOperation, HorizonGateway, PaymentBuilder, UnsignedTransaction},
    reconcile::ReconciliationEngine,
    settlement::{SettlementEngine, SettlementSummary},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub campaigns: Arc<CampaignRepository>,
    pub ledger: Arc<LedgerRepository>,
    pub settlement: Arc<SettlementEngine>,
    pub builder: Arc<PaymentBuilder>,
    pub reconciler: Arc<ReconciliationEngine>,
    pub gateway: Arc<dyn HorizonGateway>,
}

/// POST /api/v1/campaigns
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> AppResult<Json<CampaignResponse>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    validate_campaign_fields(&state.config, &request.category, request.deadline)?;

    let campaign = state
        .campaigns
        .create(NewCampaign {
            owner_public_key: request.owner_public_key,
            name: request.name,
            category: request.category,
            description: request.description,
            goal: request.goal,
            deadline: request.deadline,
        })
        .await?;

    info!("campaign {} created by {}", campaign.id, campaign.owner_public_key);
    Ok(Json(CampaignResponse::from_campaign(campaign, 0)))
}

/// GET /api/v1/campaigns
pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<CampaignListQuery>,
) -> AppResult<Json<Vec<CampaignResponse>>> {
    let status = match query.status.as_deref() {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(
            CampaignStatus::parse(&raw.to_lowercase())
                .ok_or_else(|| AppError::Validation(format!("unknown status '{}'", raw)))?,
        ),
    };

    let campaigns = state
        .campaigns
        .list(&CampaignFilter {
            name: query.name,
            category: query.category,
            status,
        })
        .await?;

    let totals = state.ledger.donation_totals().await?;
    let response = campaigns
        .into_iter()
        .map(|c| {
            let total = totals.get(&c.id).copied().unwrap_or(0);
            CampaignResponse::from_campaign(c, total)
        })
        .collect();

    Ok(Json(response))
}

/// GET /api/v1/campaigns/:id
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<CampaignResponse>> {
    let campaign = state
        .campaigns
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("campaign {} not found", id)))?;

    let total = state.ledger.total_donations(id).await?;
    Ok(Json(CampaignResponse::from_campaign(campaign, total)))
}

/// PUT /api/v1/campaigns/:id
pub async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateCampaignRequest>,
) -> AppResult<Json<CampaignResponse>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    validate_campaign_fields(&state.config, &request.category, request.deadline)?;

    let campaign = state
        .campaigns
        .update_details(
            id,
            &request.name,
            &request.category,
            &request.description,
            request.goal,
            request.deadline,
        )
        .await?;

    let total = state.ledger.total_donations(id).await?;
    Ok(Json(CampaignResponse::from_campaign(campaign, total)))
}

/// POST /api/v1/campaigns/:id/cancel
pub async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<CancelResponse>> {
    let status = state.settlement.cancel_campaign(id).await?;
    Ok(Json(CancelResponse {
        campaign_id: id,
        status,
    }))
}

/// POST /api/v1/campaigns/:id/donate
///
/// Validates the donation and returns an unsigned transaction moving the
/// amount from the donor to the operator account; the wallet signs it and
/// posts the result to /transactions/submit.
pub async fn donate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<DonateRequest>,
) -> AppResult<Json<UnsignedTransaction>> {
    let amount = parse_amount(&request.amount)?;

    // Existence first, for a useful 404; the builder re-checks state.
    state
        .campaigns
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("campaign {} not found", id)))?;

    let operation = PaymentOperation {
        campaign_id: id,
        amount,
        source_public_key: request.donor_public_key,
        destination_public_key: state.config.operator_public_key.clone(),
    };

    let unsigned = state
        .builder
        .build_payment_transaction(vec![operation], OperationType::Donation)
        .await?;

    Ok(Json(unsigned))
}

/// GET /api/v1/campaigns/:id/refund-operations
///
/// Per-donor donation totals - the line items a refund batch is built from.
pub async fn refund_operations(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<DonorTotal>>> {
    state
        .campaigns
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("campaign {} not found", id)))?;

    Ok(Json(state.ledger.donations_by_donor(id).await?))
}

/// POST /api/v1/payouts/build
///
/// Admin batch: one fund operation per selected campaign, or one refund
/// operation per donor of each selected campaign. Campaigns whose status
/// does not match the requested operation are dropped from the batch.
pub async fn build_payout(
    State(state): State<AppState>,
    Json(request): Json<PayoutRequest>,
) -> AppResult<Json<UnsignedTransaction>> {
    let required_status = match request.operation_type {
        OperationType::Fund => CampaignStatus::Fund,
        OperationType::Refund => CampaignStatus::Refund,
        OperationType::Donation => {
            return Err(AppError::Validation(
                "payout batches must be fund or refund".to_string(),
            ))
        }
    };

    let operator = state.config.operator_public_key.clone();
    let mut operations = Vec::new();

    for id in &request.campaign_ids {
        let campaign = match state.campaigns.get(*id).await? {
            Some(c) if c.status == required_status => c,
            Some(c) => {
                warn!(
                    "campaign {} skipped from {} batch (status {})",
                    c.id, request.operation_type, c.status
                );
                continue;
            }
            None => {
                warn!("campaign {} skipped from batch (not found)", id);
                continue;
            }
        };

        match request.operation_type {
            OperationType::Fund => {
                let total = state.ledger.total_donations(campaign.id).await?;
                operations.push(PaymentOperation {
                    campaign_id: campaign.id,
                    amount: total,
                    source_public_key: operator.clone(),
                    destination_public_key: campaign.owner_public_key.clone(),
                });
            }
            OperationType::Refund => {
                for donor in state.ledger.donations_by_donor(campaign.id).await? {
                    operations.push(PaymentOperation {
                        campaign_id: campaign.id,
                        amount: donor.total_donations,
                        source_public_key: operator.clone(),
                        destination_public_key: donor.donor_public_key,
                    });
                }
            }
            OperationType::Donation => unreachable!(),
        }
    }

    if operations.is_empty() {
        return Err(AppError::Validation(
            "no eligible campaigns for this payout batch".to_string(),
        ));
    }

    let unsigned = state
        .builder
        .build_payment_transaction(operations, request.operation_type)
        .await?;

    Ok(Json(unsigned))
}

/// POST /api/v1/transactions/submit
///
/// Submits a signed envelope to the network. Reconciliation runs only when
/// the network confirms the submission; a rejected transaction leaves the
/// staged batch untouched for the next build to clear.
pub async fn submit_transaction(
    State(state): State<AppState>,
    Json(request): Json<SubmitTransactionRequest>,
) -> AppResult<Json<SubmitTransactionResponse>> {
    let result = state
        .gateway
        .submit_transaction(&request.signed_envelope_xdr)
        .await?;

    if !result.successful {
        warn!("submission {} reported unsuccessful", result.hash);
        return Ok(Json(SubmitTransactionResponse {
            successful: false,
            hash: result.hash,
            reconciliation: Default::default(),
        }));
    }

    let reconciliation = state
        .reconciler
        .reconcile_submission(&result.hash, &request.submitter_public_key)
        .await?;

    Ok(Json(SubmitTransactionResponse {
        successful: true,
        hash: result.hash,
        reconciliation,
    }))
}

/// POST /api/v1/admin/settle
pub async fn settle_campaigns(
    State(state): State<AppState>,
) -> AppResult<Json<SettlementSummary>> {
    Ok(Json(state.settlement.settle_expired_campaigns().await?))
}

/// GET /api/v1/donations/:public_key
pub async fn donation_history(
    State(state): State<AppState>,
    Path(public_key): Path<String>,
) -> AppResult<Json<Vec<DonationRecord>>> {
    Ok(Json(state.ledger.donation_history(&public_key).await?))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    sqlx::query("SELECT 1").execute(&state.campaigns.pool).await?;

    Ok(Json(HealthResponse {
        status: "ok",
        database: "reachable",
    }))
}

fn validate_campaign_fields(
    config: &Config,
    category: &str,
    deadline: chrono::DateTime<Utc>,
) -> AppResult<()> {
    if !config.is_known_category(category) {
        return Err(AppError::Validation(format!(
            "'{}' is not a valid category",
            category
        )));
    }
    if deadline <= Utc::now() {
        return Err(AppError::Validation(
            "past deadlines are not allowed".to_string(),
        ));
    }
    Ok(())
}

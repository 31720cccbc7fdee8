use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::campaigns::models::CampaignStatus;
use crate::campaigns::repository::CampaignRepository;
use crate::error::{AppError, AppResult};
use crate::ledger::repository::LedgerRepository;

/// Outcome of a deadline expiry, from pledged total vs goal.
pub fn expiry_outcome(total_donations: i64, goal: i64) -> CampaignStatus {
    if total_donations == 0 {
        CampaignStatus::Unsuccessful
    } else if total_donations >= goal {
        CampaignStatus::Fund
    } else {
        CampaignStatus::Refund
    }
}

/// Outcome of an owner cancellation. Canceled campaigns are never funded,
/// even when the goal was already met; donors get their money back.
pub fn cancellation_outcome(total_donations: i64) -> CampaignStatus {
    if total_donations == 0 {
        CampaignStatus::Unsuccessful
    } else {
        CampaignStatus::Refund
    }
}

/// Result of one settlement sweep. A failed campaign never aborts the rest
/// of the sweep; it lands in `failures` instead.
#[derive(Debug, Default, Serialize)]
pub struct SettlementSummary {
    pub settled: Vec<SettledCampaign>,
    pub unexpired: usize,
    pub failures: Vec<SettlementFailure>,
}

#[derive(Debug, Serialize)]
pub struct SettledCampaign {
    pub campaign_id: i64,
    pub status: CampaignStatus,
}

#[derive(Debug, Serialize)]
pub struct SettlementFailure {
    pub campaign_id: i64,
    pub error: String,
}

/// Settlement engine - flips expired campaigns out of `active` based on
/// their pledged totals. Runs at startup, on the background schedule, and on
/// demand from the admin surface.
pub struct SettlementEngine {
    campaigns: Arc<CampaignRepository>,
    ledger: Arc<LedgerRepository>,
}

impl SettlementEngine {
    pub fn new(campaigns: Arc<CampaignRepository>, ledger: Arc<LedgerRepository>) -> Self {
        Self { campaigns, ledger }
    }

    /// Sweep all active campaigns and settle the expired ones.
    ///
    /// Each transition is an independent compare-and-set on
    /// `status = active`, so re-running over an already-settled campaign is
    /// a no-op and two concurrent sweeps cannot double-apply.
    pub async fn settle_expired_campaigns(&self) -> AppResult<SettlementSummary> {
        let now = Utc::now();
        let active = self.campaigns.list_by_status(CampaignStatus::Active).await?;

        let mut summary = SettlementSummary::default();

        for campaign in active {
            if !campaign.is_expired(now) {
                summary.unexpired += 1;
                continue;
            }

            match self.settle_one(campaign.id, campaign.goal).await {
                Ok(Some(status)) => summary.settled.push(SettledCampaign {
                    campaign_id: campaign.id,
                    status,
                }),
                Ok(None) => {
                    // Another sweep got there first.
                    debug!("campaign {} already settled", campaign.id);
                }
                Err(e) => {
                    error!("failed to settle campaign {}: {}", campaign.id, e);
                    summary.failures.push(SettlementFailure {
                        campaign_id: campaign.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "settlement sweep: {} settled, {} unexpired, {} failed",
            summary.settled.len(),
            summary.unexpired,
            summary.failures.len()
        );

        Ok(summary)
    }

    async fn settle_one(&self, campaign_id: i64, goal: i64) -> AppResult<Option<CampaignStatus>> {
        let total = self.ledger.total_donations(campaign_id).await?;
        let target = expiry_outcome(total, goal);

        let applied = self
            .campaigns
            .transition(campaign_id, CampaignStatus::Active, target)
            .await?;

        Ok(applied.then_some(target))
    }

    /// Owner-initiated cancellation, effective immediately regardless of the
    /// deadline. Applies the refund/unsuccessful rule; never yields `fund`.
    pub async fn cancel_campaign(&self, campaign_id: i64) -> AppResult<CampaignStatus> {
        let campaign = self
            .campaigns
            .get(campaign_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("campaign {} not found", campaign_id)))?;

        if campaign.status != CampaignStatus::Active {
            return Err(AppError::Validation(format!(
                "campaign {} is {} and cannot be canceled",
                campaign_id, campaign.status
            )));
        }

        let total = self.ledger.total_donations(campaign_id).await?;
        let target = cancellation_outcome(total);

        let applied = self
            .campaigns
            .transition(campaign_id, CampaignStatus::Active, target)
            .await?;

        if !applied {
            return Err(AppError::Validation(format!(
                "campaign {} is no longer active",
                campaign_id
            )));
        }

        info!("campaign {} canceled -> {}", campaign_id, target);
        Ok(target)
    }
}

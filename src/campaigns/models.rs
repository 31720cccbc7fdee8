use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use std::fmt;

/// Campaign lifecycle status.
///
/// Transitions are monotone; a campaign never returns to `Active` once left:
/// - Active → Fund | Refund | Unsuccessful (settlement or cancellation)
/// - Fund → Successful (payout reconciled)
/// - Refund → Unsuccessful (refunds reconciled)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Fund,
    Refund,
    Successful,
    Unsuccessful,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Fund => "fund",
            CampaignStatus::Refund => "refund",
            CampaignStatus::Successful => "successful",
            CampaignStatus::Unsuccessful => "unsuccessful",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CampaignStatus::Active),
            "fund" => Some(CampaignStatus::Fund),
            "refund" => Some(CampaignStatus::Refund),
            "successful" => Some(CampaignStatus::Successful),
            "unsuccessful" => Some(CampaignStatus::Unsuccessful),
            _ => None,
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Campaign entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: i64,
    pub owner_public_key: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub goal: i64,
    pub deadline: DateTime<Utc>,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline < now
    }
}

/// Fields for a new campaign; status is always `Active` at creation.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub owner_public_key: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub goal: i64,
    pub deadline: DateTime<Utc>,
}

/// Optional filters for campaign listings.
#[derive(Debug, Clone, Default)]
pub struct CampaignFilter {
    pub name: Option<String>,
    pub category: Option<String>,
    pub status: Option<CampaignStatus>,
}

/// Funding progress as a floor percentage of the goal.
pub fn funding_progress(total_donations: i64, goal: i64) -> u32 {
    if goal <= 0 {
        return 0;
    }
    ((total_donations.max(0) as u128 * 100) / goal as u128) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_floored_percentage() {
        assert_eq!(funding_progress(0, 1000), 0);
        assert_eq!(funding_progress(999, 1000), 99);
        assert_eq!(funding_progress(1000, 1000), 100);
        assert_eq!(funding_progress(1200, 1000), 120);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            CampaignStatus::Active,
            CampaignStatus::Fund,
            CampaignStatus::Refund,
            CampaignStatus::Successful,
            CampaignStatus::Unsuccessful,
        ] {
            assert_eq!(CampaignStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CampaignStatus::parse("pending"), None);
    }
}

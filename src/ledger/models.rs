use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use std::fmt;

/// Kind of payment operation moving value through the platform.
///
/// `Donation` flows donor → operator, `Fund` pays a campaign owner out,
/// `Refund` returns a donor's total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Donation,
    Fund,
    Refund,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Donation => "donation",
            OperationType::Fund => "fund",
            OperationType::Refund => "refund",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One confirmed payment settled on the external network. Append-only:
/// rows are never updated or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerTransaction {
    pub id: i64,
    pub campaign_id: i64,
    pub amount: i64,
    pub sender_public_key: String,
    pub receiver_public_key: String,
    pub operation_type: OperationType,
    /// Network confirmation hash; shared by every row committed from the
    /// same submitted transaction.
    pub confirmation_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Ledger row before commit assigns hash and timestamp.
#[derive(Debug, Clone)]
pub struct NewLedgerTransaction {
    pub campaign_id: i64,
    pub amount: i64,
    pub sender_public_key: String,
    pub receiver_public_key: String,
    pub operation_type: OperationType,
}

/// Aggregated donations of one donor to one campaign; the unit a refund
/// operation is built from.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DonorTotal {
    pub campaign_id: i64,
    pub donor_public_key: String,
    pub total_donations: i64,
}

/// A donor-facing history entry (joined with the campaign for display).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DonationRecord {
    pub campaign_id: i64,
    pub campaign_name: String,
    pub category: String,
    pub amount: i64,
    pub confirmation_hash: String,
    pub created_at: DateTime<Utc>,
}

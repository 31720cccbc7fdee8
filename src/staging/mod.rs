pub mod repository;

pub use repository::StagingRepository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

use crate::ledger::models::OperationType;

/// A pending payout/donation line item, persisted before its transaction is
/// submitted and consumed on confirmation. The store is the durable intent
/// log for the in-flight payment cycle: it holds operations for at most one
/// transaction, and building a new transaction clears any prior set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StagedOperation {
    pub id: i64,
    pub campaign_id: i64,
    pub amount: i64,
    pub destination_public_key: String,
    pub operation_type: OperationType,
    pub staged_at: DateTime<Utc>,
}

/// Staged row before persistence assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewStagedOperation {
    pub campaign_id: i64,
    pub amount: i64,
    pub destination_public_key: String,
    pub operation_type: OperationType,
}

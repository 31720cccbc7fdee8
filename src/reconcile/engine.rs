use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::campaigns::models::CampaignStatus;
use crate::campaigns::repository::CampaignRepository;
use crate::error::{AppError, AppResult};
use crate::ledger::models::{NewLedgerTransaction, OperationType};
use crate::ledger::repository::LedgerRepository;
use crate::payments::PaymentCycle;
use crate::staging::StagingRepository;

/// Who paid whom for one staged operation. Donations flow into the operator
/// account; funds and refunds are paid out of it.
pub fn route_parties(
    operation_type: OperationType,
    submitter_public_key: &str,
    operator_public_key: &str,
    destination_public_key: &str,
) -> (String, String) {
    match operation_type {
        OperationType::Donation => (
            submitter_public_key.to_string(),
            operator_public_key.to_string(),
        ),
        OperationType::Fund | OperationType::Refund => (
            operator_public_key.to_string(),
            destination_public_key.to_string(),
        ),
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ReconcileSummary {
    /// Staged operations committed into the ledger by this call.
    pub committed: usize,
    /// Operations already carrying this hash (replayed repair).
    pub skipped: usize,
}

/// Reconciliation engine - replays the staged intent log into permanent
/// state once the network has confirmed a submission.
///
/// Each staged operation commits as one database transaction: ledger row and
/// campaign-status transition land together or not at all. The whole replay
/// is idempotent keyed on the confirmation hash, so a repair retry after a
/// partial failure skips what already committed.
pub struct ReconciliationEngine {
    operator_public_key: String,
    campaigns: Arc<CampaignRepository>,
    ledger: Arc<LedgerRepository>,
    staging: Arc<StagingRepository>,
    cycle: Arc<PaymentCycle>,
}

impl ReconciliationEngine {
    pub fn new(
        operator_public_key: String,
        campaigns: Arc<CampaignRepository>,
        ledger: Arc<LedgerRepository>,
        staging: Arc<StagingRepository>,
        cycle: Arc<PaymentCycle>,
    ) -> Self {
        Self {
            operator_public_key,
            campaigns,
            ledger,
            staging,
            cycle,
        }
    }

    /// Commit the current staged batch under `confirmation_hash`.
    ///
    /// Call only after the network reported the submission successful. A
    /// rejected submission leaves the stage untouched; the next build clears
    /// it, so staged state never advances campaign status on its own.
    pub async fn reconcile_submission(
        &self,
        confirmation_hash: &str,
        submitter_public_key: &str,
    ) -> AppResult<ReconcileSummary> {
        let _cycle = self.cycle.acquire().await;

        let staged = self.staging.all().await?;
        if staged.is_empty() {
            warn!(
                "reconciliation for {} found nothing staged",
                confirmation_hash
            );
            return Ok(ReconcileSummary::default());
        }

        let mut summary = ReconcileSummary::default();

        for op in &staged {
            let (sender, receiver) = route_parties(
                op.operation_type,
                submitter_public_key,
                &self.operator_public_key,
                &op.destination_public_key,
            );

            let mut tx = self.campaigns.begin_tx().await?;

            let already_committed = self
                .ledger
                .exists_in_tx(&mut tx, confirmation_hash, op.campaign_id, op.operation_type)
                .await?;

            if !already_committed {
                self.ledger
                    .append_in_tx(
                        &mut tx,
                        &NewLedgerTransaction {
                            campaign_id: op.campaign_id,
                            amount: op.amount,
                            sender_public_key: sender,
                            receiver_public_key: receiver,
                            operation_type: op.operation_type,
                        },
                        confirmation_hash,
                    )
                    .await?;
            }

            let transition = match op.operation_type {
                OperationType::Donation => None,
                OperationType::Fund => Some((CampaignStatus::Fund, CampaignStatus::Successful)),
                OperationType::Refund => {
                    Some((CampaignStatus::Refund, CampaignStatus::Unsuccessful))
                }
            };

            if let Some((from, to)) = transition {
                let applied = self
                    .campaigns
                    .transition_in_tx(&mut tx, op.campaign_id, from, to)
                    .await?;

                if !applied {
                    // A repair retry finds the target status already set;
                    // anything else is a half-committed batch the operator
                    // must look at before anything retries further.
                    let current = self.campaigns.status_in_tx(&mut tx, op.campaign_id).await?;
                    if current != Some(to) {
                        tx.rollback().await?;
                        return Err(AppError::ReconciliationInconsistency {
                            campaign_id: op.campaign_id,
                            operation: op.operation_type,
                            hash: confirmation_hash.to_string(),
                            detail: format!(
                                "expected status {} or {}, found {}",
                                from,
                                to,
                                current
                                    .map(|s| s.to_string())
                                    .unwrap_or_else(|| "no campaign".to_string())
                            ),
                        });
                    }
                }
            }

            tx.commit().await?;

            if already_committed {
                summary.skipped += 1;
            } else {
                summary.committed += 1;
            }
        }

        info!(
            "reconciled {}: {} committed, {} skipped",
            confirmation_hash, summary.committed, summary.skipped
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaigns::models::NewCampaign;
    use crate::payments::builder::{PaymentBuilder, PaymentOperation};
    use crate::payments::horizon::testing::FakeHorizon;
    use crate::settlement::engine::SettlementEngine;
    use crate::staging::NewStagedOperation;
    use chrono::{Duration, Utc};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    fn test_key(seed: u8) -> String {
        stellar_strkey::ed25519::PublicKey([seed; 32]).to_string()
    }

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    struct Fixture {
        campaigns: Arc<CampaignRepository>,
        ledger: Arc<LedgerRepository>,
        staging: Arc<StagingRepository>,
        cycle: Arc<PaymentCycle>,
        engine: ReconciliationEngine,
        operator: String,
        owner: String,
        donor: String,
    }

    async fn fixture() -> Fixture {
        let pool = test_pool().await;
        let campaigns = Arc::new(CampaignRepository::new(pool.clone()));
        let ledger = Arc::new(LedgerRepository::new(pool.clone()));
        let staging = Arc::new(StagingRepository::new(pool.clone()));
        let cycle = Arc::new(PaymentCycle::new());

        let operator = test_key(1);
        let engine = ReconciliationEngine::new(
            operator.clone(),
            campaigns.clone(),
            ledger.clone(),
            staging.clone(),
            cycle.clone(),
        );

        Fixture {
            campaigns,
            ledger,
            staging,
            cycle,
            engine,
            operator,
            owner: test_key(2),
            donor: test_key(3),
        }
    }

    async fn create_campaign(f: &Fixture, goal: i64) -> i64 {
        f.campaigns
            .create(NewCampaign {
                owner_public_key: f.owner.clone(),
                name: "tape".to_string(),
                category: "music".to_string(),
                description: "a record".to_string(),
                goal,
                deadline: Utc::now() - Duration::days(1),
            })
            .await
            .unwrap()
            .id
    }

    async fn record_donation(f: &Fixture, campaign_id: i64, amount: i64, hash: &str) {
        let mut tx = f.ledger.pool.begin().await.unwrap();
        f.ledger
            .append_in_tx(
                &mut tx,
                &NewLedgerTransaction {
                    campaign_id,
                    amount,
                    sender_public_key: f.donor.clone(),
                    receiver_public_key: f.operator.clone(),
                    operation_type: OperationType::Donation,
                },
                hash,
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[test]
    fn parties_follow_operation_direction() {
        let (sender, receiver) = route_parties(OperationType::Donation, "DONOR", "OP", "DEST");
        assert_eq!((sender.as_str(), receiver.as_str()), ("DONOR", "OP"));

        let (sender, receiver) = route_parties(OperationType::Fund, "SUBMITTER", "OP", "OWNER");
        assert_eq!((sender.as_str(), receiver.as_str()), ("OP", "OWNER"));

        let (sender, receiver) = route_parties(OperationType::Refund, "SUBMITTER", "OP", "DONOR");
        assert_eq!((sender.as_str(), receiver.as_str()), ("OP", "DONOR"));
    }

    #[tokio::test]
    async fn fund_cycle_end_to_end() {
        let f = fixture().await;
        let id = create_campaign(&f, 1000).await;
        record_donation(&f, id, 1200, "H0").await;

        // Deadline passed with the goal met: the sweep marks it fundable.
        let settlement = SettlementEngine::new(f.campaigns.clone(), f.ledger.clone());
        settlement.settle_expired_campaigns().await.unwrap();
        assert_eq!(
            f.campaigns.current_status(id).await.unwrap(),
            Some(CampaignStatus::Fund)
        );

        // Admin builds the payout; the external signer and network are out
        // of process, so the confirmed hash comes back by itself.
        let builder = PaymentBuilder::new(
            f.operator.clone(),
            "Test SDF Network ; September 2015".to_string(),
            30,
            f.campaigns.clone(),
            f.staging.clone(),
            Arc::new(FakeHorizon::with_accounts(&[&f.operator, &f.owner])),
            f.cycle.clone(),
        );
        builder
            .build_payment_transaction(
                vec![PaymentOperation {
                    campaign_id: id,
                    amount: 1200,
                    source_public_key: f.operator.clone(),
                    destination_public_key: f.owner.clone(),
                }],
                OperationType::Fund,
            )
            .await
            .unwrap();

        let summary = f.engine.reconcile_submission("H1", &f.operator).await.unwrap();
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.skipped, 0);

        let rows = f.ledger.by_confirmation_hash("H1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].operation_type, OperationType::Fund);
        assert_eq!(rows[0].amount, 1200);
        assert_eq!(rows[0].sender_public_key, f.operator);
        assert_eq!(rows[0].receiver_public_key, f.owner);

        assert_eq!(
            f.campaigns.current_status(id).await.unwrap(),
            Some(CampaignStatus::Successful)
        );
    }

    #[tokio::test]
    async fn replayed_reconciliation_does_not_duplicate_rows() {
        let f = fixture().await;
        let id = create_campaign(&f, 1000).await;
        f.campaigns
            .transition(id, CampaignStatus::Active, CampaignStatus::Fund)
            .await
            .unwrap();
        f.staging
            .stage(&NewStagedOperation {
                campaign_id: id,
                amount: 1200,
                destination_public_key: f.owner.clone(),
                operation_type: OperationType::Fund,
            })
            .await
            .unwrap();

        let first = f.engine.reconcile_submission("H1", &f.operator).await.unwrap();
        assert_eq!(first.committed, 1);

        // Simulated repair retry: same hash, stage still holds the batch.
        let second = f.engine.reconcile_submission("H1", &f.operator).await.unwrap();
        assert_eq!(second.committed, 0);
        assert_eq!(second.skipped, 1);

        assert_eq!(f.ledger.by_confirmation_hash("H1").await.unwrap().len(), 1);
        assert_eq!(
            f.campaigns.current_status(id).await.unwrap(),
            Some(CampaignStatus::Successful)
        );
    }

    #[tokio::test]
    async fn donation_commits_without_status_change() {
        let f = fixture().await;
        let id = f
            .campaigns
            .create(NewCampaign {
                owner_public_key: f.owner.clone(),
                name: "tape".to_string(),
                category: "music".to_string(),
                description: "a record".to_string(),
                goal: 1000,
                deadline: Utc::now() + Duration::days(10),
            })
            .await
            .unwrap()
            .id;
        f.staging
            .stage(&NewStagedOperation {
                campaign_id: id,
                amount: 250,
                destination_public_key: f.operator.clone(),
                operation_type: OperationType::Donation,
            })
            .await
            .unwrap();

        f.engine.reconcile_submission("H7", &f.donor).await.unwrap();

        let rows = f.ledger.by_confirmation_hash("H7").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sender_public_key, f.donor);
        assert_eq!(rows[0].receiver_public_key, f.operator);
        assert_eq!(
            f.campaigns.current_status(id).await.unwrap(),
            Some(CampaignStatus::Active)
        );
        assert_eq!(f.ledger.total_donations(id).await.unwrap(), 250);
    }

    #[tokio::test]
    async fn half_committed_batch_surfaces_inconsistency() {
        let f = fixture().await;
        let id = create_campaign(&f, 1000).await;
        // Stage claims a payout, but the campaign never reached `fund`.
        f.staging
            .stage(&NewStagedOperation {
                campaign_id: id,
                amount: 1200,
                destination_public_key: f.owner.clone(),
                operation_type: OperationType::Fund,
            })
            .await
            .unwrap();

        let err = f
            .engine
            .reconcile_submission("H1", &f.operator)
            .await
            .unwrap_err();

        match err {
            AppError::ReconciliationInconsistency {
                campaign_id,
                operation,
                hash,
                ..
            } => {
                assert_eq!(campaign_id, id);
                assert_eq!(operation, OperationType::Fund);
                assert_eq!(hash, "H1");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // The failed step rolled back whole: no orphan ledger row.
        assert!(f.ledger.by_confirmation_hash("H1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_stage_is_a_noop() {
        let f = fixture().await;
        let summary = f.engine.reconcile_submission("H1", &f.operator).await.unwrap();
        assert_eq!(summary.committed, 0);
        assert_eq!(summary.skipped, 0);
    }
}

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use stellar_xdr::curr::{
    Asset, Limits, Memo, MuxedAccount, Operation, OperationBody, PaymentOp, Preconditions,
    SequenceNumber, TimeBounds, TimePoint, Transaction, TransactionExt, TransactionV1Envelope,
    Uint256, WriteXdr,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::campaigns::models::CampaignStatus;
use crate::campaigns::repository::CampaignRepository;
use crate::error::{AppError, AppResult};
use crate::ledger::models::OperationType;
use crate::payments::horizon::HorizonGateway;
use crate::payments::PaymentCycle;
use crate::staging::{NewStagedOperation, StagingRepository};

/// One payout/donation line item requested by the caller.
#[derive(Debug, Clone)]
pub struct PaymentOperation {
    pub campaign_id: i64,
    pub amount: i64,
    pub source_public_key: String,
    pub destination_public_key: String,
}

/// An unsigned transaction in the network's exchange format, ready for the
/// external signer.
#[derive(Debug, Clone, Serialize)]
pub struct UnsignedTransaction {
    pub envelope_xdr: String,
    pub source_public_key: String,
    pub network_passphrase: String,
    pub operation_count: usize,
    pub fee: u32,
    pub valid_until: DateTime<Utc>,
    pub batch_id: String,
}

/// Payment transaction builder - groups payout operations into one unsigned
/// envelope and stages each operation as durable intent before the envelope
/// leaves the process.
///
/// Staging and drafting happen together per operation: a crash mid-loop
/// leaves a staged set consistent with the partially-built draft, and the
/// next build clears it.
pub struct PaymentBuilder {
    operator_public_key: String,
    network_passphrase: String,
    transaction_timeout_secs: u64,
    campaigns: Arc<CampaignRepository>,
    staging: Arc<StagingRepository>,
    gateway: Arc<dyn HorizonGateway>,
    cycle: Arc<PaymentCycle>,
}

impl PaymentBuilder {
    pub fn new(
        operator_public_key: String,
        network_passphrase: String,
        transaction_timeout_secs: u64,
        campaigns: Arc<CampaignRepository>,
        staging: Arc<StagingRepository>,
        gateway: Arc<dyn HorizonGateway>,
        cycle: Arc<PaymentCycle>,
    ) -> Self {
        Self {
            operator_public_key,
            network_passphrase,
            transaction_timeout_secs,
            campaigns,
            staging,
            gateway,
            cycle,
        }
    }

    /// Build one unsigned transaction covering `operations`.
    ///
    /// All validation happens before any write: an invalid batch leaves the
    /// staging store exactly as it was.
    pub async fn build_payment_transaction(
        &self,
        operations: Vec<PaymentOperation>,
        operation_type: OperationType,
    ) -> AppResult<UnsignedTransaction> {
        // VALIDATION 1: batch shape
        if operations.is_empty() {
            return Err(AppError::Validation(
                "at least one payment operation is required".to_string(),
            ));
        }
        for op in &operations {
            if op.amount <= 0 {
                return Err(AppError::Validation(format!(
                    "invalid amount {} for campaign {}",
                    op.amount, op.campaign_id
                )));
            }
        }

        // VALIDATION 2: source account. Funds and refunds are paid by the
        // operator; a donation batch is paid by its single donor.
        let source_public_key = match operation_type {
            OperationType::Fund | OperationType::Refund => self.operator_public_key.clone(),
            OperationType::Donation => {
                let donor = operations[0].source_public_key.clone();
                if operations.iter().any(|op| op.source_public_key != donor) {
                    return Err(AppError::Validation(
                        "all operations of a donation batch must share one donor".to_string(),
                    ));
                }
                donor
            }
        };
        decode_public_key(&source_public_key)?;

        // VALIDATION 3: campaign state per operation
        for op in &operations {
            let campaign = self.campaigns.get(op.campaign_id).await?.ok_or_else(|| {
                AppError::NotFound(format!("campaign {} not found", op.campaign_id))
            })?;

            match operation_type {
                OperationType::Donation => {
                    if campaign.status != CampaignStatus::Active {
                        return Err(AppError::Validation(format!(
                            "campaign {} is {} and cannot receive donations",
                            campaign.id, campaign.status
                        )));
                    }
                    if campaign.owner_public_key == source_public_key {
                        return Err(AppError::Validation(
                            "self-donations are not allowed".to_string(),
                        ));
                    }
                }
                OperationType::Fund => {
                    if campaign.status != CampaignStatus::Fund {
                        return Err(AppError::Validation(format!(
                            "campaign {} is {} and cannot be funded",
                            campaign.id, campaign.status
                        )));
                    }
                }
                OperationType::Refund => {
                    if campaign.status != CampaignStatus::Refund {
                        return Err(AppError::Validation(format!(
                            "campaign {} is {} and cannot be refunded",
                            campaign.id, campaign.status
                        )));
                    }
                }
            }
        }

        // VALIDATION 4: every destination must exist on the network. Fail
        // fast, whole batch, before anything is staged.
        for op in &operations {
            decode_public_key(&op.destination_public_key)?;
            self.gateway
                .load_account(&op.destination_public_key)
                .await
                .map_err(|e| match e {
                    AppError::NotFound(_) => AppError::NotFound(format!(
                        "destination account {} does not exist on the network",
                        op.destination_public_key
                    )),
                    other => other,
                })?;
        }

        // Exclusive payment cycle from here on: clear-then-populate must not
        // interleave with another build or a reconcile.
        let _cycle = self.cycle.acquire().await;

        self.staging.clear().await?;

        let source_account = self.gateway.load_account(&source_public_key).await?;
        let base_fee = self.gateway.fetch_base_fee().await?;
        debug!(
            "source account {} at sequence {}",
            source_account.account_id, source_account.sequence
        );

        let batch_id = format!("batch-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let valid_until = Utc::now() + Duration::seconds(self.transaction_timeout_secs as i64);

        // Draft and stage together, one operation at a time.
        let mut payment_ops = Vec::with_capacity(operations.len());
        for op in &operations {
            payment_ops.push(Operation {
                source_account: None,
                body: OperationBody::Payment(PaymentOp {
                    destination: muxed_account(&op.destination_public_key)?,
                    asset: Asset::Native,
                    amount: op.amount,
                }),
            });

            self.staging
                .stage(&NewStagedOperation {
                    campaign_id: op.campaign_id,
                    amount: op.amount,
                    destination_public_key: op.destination_public_key.clone(),
                    operation_type,
                })
                .await?;
        }

        let operation_count = payment_ops.len();
        let fee = base_fee.saturating_mul(operation_count as u32);

        let tx = Transaction {
            source_account: muxed_account(&source_public_key)?,
            fee,
            seq_num: SequenceNumber(source_account.sequence + 1),
            cond: Preconditions::Time(TimeBounds {
                min_time: TimePoint(0),
                max_time: TimePoint(valid_until.timestamp() as u64),
            }),
            memo: Memo::Text(
                batch_id
                    .as_bytes()
                    .to_vec()
                    .try_into()
                    .map_err(|_| AppError::Internal("memo too long".to_string()))?,
            ),
            operations: payment_ops.try_into().map_err(|_| {
                AppError::Validation("too many operations for one transaction".to_string())
            })?,
            ext: TransactionExt::V0,
        };

        // Unsigned envelope; signing happens outside the process.
        let envelope = TransactionV1Envelope {
            tx,
            signatures: Vec::new()
                .try_into()
                .map_err(|_| AppError::Internal("failed to create signature list".to_string()))?,
        };

        let xdr_bytes = envelope
            .to_xdr(Limits::none())
            .map_err(|e| AppError::Internal(format!("failed to encode envelope: {:?}", e)))?;
        let envelope_xdr = base64::engine::general_purpose::STANDARD.encode(&xdr_bytes);

        info!(
            "built {} transaction {}: {} operation(s), fee {}",
            operation_type, batch_id, operation_count, fee
        );

        Ok(UnsignedTransaction {
            envelope_xdr,
            source_public_key,
            network_passphrase: self.network_passphrase.clone(),
            operation_count,
            fee,
            valid_until,
            batch_id,
        })
    }
}

/// Decode a G... address into its ed25519 key bytes.
pub fn decode_public_key(public_key: &str) -> AppResult<[u8; 32]> {
    stellar_strkey::ed25519::PublicKey::from_string(public_key)
        .map(|pk| pk.0)
        .map_err(|_| AppError::Validation(format!("invalid public key: {}", public_key)))
}

fn muxed_account(public_key: &str) -> AppResult<MuxedAccount> {
    Ok(MuxedAccount::Ed25519(Uint256(decode_public_key(
        public_key,
    )?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaigns::models::NewCampaign;
    use crate::payments::horizon::testing::FakeHorizon;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use stellar_xdr::curr::ReadXdr;

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
        builder: PaymentBuilder,
        campaigns: Arc<CampaignRepository>,
        staging: Arc<StagingRepository>,
        operator: String,
        owner: String,
    }

    async fn fixture(gateway: FakeHorizon) -> Fixture {
        let pool = test_pool().await;
        let campaigns = Arc::new(CampaignRepository::new(pool.clone()));
        let staging = Arc::new(StagingRepository::new(pool.clone()));

        let operator = test_key(1);
        let owner = test_key(2);

        let builder = PaymentBuilder::new(
            operator.clone(),
            "Test SDF Network ; September 2015".to_string(),
            30,
            campaigns.clone(),
            staging.clone(),
            Arc::new(gateway),
            Arc::new(PaymentCycle::new()),
        );

        Fixture {
            builder,
            campaigns,
            staging,
            operator,
            owner,
        }
    }

    async fn create_campaign(fixture: &Fixture, status: CampaignStatus) -> i64 {
        let campaign = fixture
            .campaigns
            .create(NewCampaign {
                owner_public_key: fixture.owner.clone(),
                name: "tape".to_string(),
                category: "music".to_string(),
                description: "a record".to_string(),
                goal: 1000,
                deadline: Utc::now() + Duration::days(30),
            })
            .await
            .unwrap();
        if status != CampaignStatus::Active {
            fixture
                .campaigns
                .transition(campaign.id, CampaignStatus::Active, status)
                .await
                .unwrap();
        }
        campaign.id
    }

    fn fund_op(campaign_id: i64, amount: i64, operator: &str, owner: &str) -> PaymentOperation {
        PaymentOperation {
            campaign_id,
            amount,
            source_public_key: operator.to_string(),
            destination_public_key: owner.to_string(),
        }
    }

    #[tokio::test]
    async fn builds_unsigned_envelope_with_staged_intent() {
        let operator = test_key(1);
        let owner = test_key(2);
        let f = fixture(FakeHorizon::with_accounts(&[&operator, &owner])).await;
        let id = create_campaign(&f, CampaignStatus::Fund).await;

        let built = f
            .builder
            .build_payment_transaction(
                vec![fund_op(id, 1200, &f.operator, &f.owner)],
                OperationType::Fund,
            )
            .await
            .unwrap();

        assert_eq!(built.operation_count, 1);
        assert_eq!(built.fee, 100);
        assert_eq!(built.source_public_key, f.operator);

        // The envelope decodes back to one unsigned native payment.
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&built.envelope_xdr)
            .unwrap();
        let envelope = TransactionV1Envelope::from_xdr(bytes, Limits::none()).unwrap();
        assert!(envelope.signatures.is_empty());
        assert_eq!(envelope.tx.operations.len(), 1);
        assert_eq!(envelope.tx.seq_num.0, 4097);
        match &envelope.tx.operations.as_slice()[0].body {
            OperationBody::Payment(payment) => {
                assert_eq!(payment.amount, 1200);
                assert_eq!(payment.asset, Asset::Native);
            }
            other => panic!("unexpected operation body: {:?}", other),
        }
        match &envelope.tx.cond {
            Preconditions::Time(bounds) => {
                assert_eq!(bounds.min_time.0, 0);
                assert!(bounds.max_time.0 > 0);
            }
            other => panic!("unexpected preconditions: {:?}", other),
        }

        let staged = f.staging.all().await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].campaign_id, id);
        assert_eq!(staged[0].amount, 1200);
        assert_eq!(staged[0].operation_type, OperationType::Fund);
    }

    #[tokio::test]
    async fn unknown_destination_rejects_batch_with_zero_writes() {
        let operator = test_key(1);
        let f = fixture(FakeHorizon::with_accounts(&[&operator])).await;
        let id = create_campaign(&f, CampaignStatus::Fund).await;

        // A leftover batch from an abandoned cycle must survive the failure.
        f.staging
            .stage(&crate::staging::NewStagedOperation {
                campaign_id: 999,
                amount: 50,
                destination_public_key: test_key(9),
                operation_type: OperationType::Refund,
            })
            .await
            .unwrap();

        let err = f
            .builder
            .build_payment_transaction(
                vec![fund_op(id, 1200, &f.operator, &f.owner)],
                OperationType::Fund,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        let staged = f.staging.all().await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].campaign_id, 999);
    }

    #[tokio::test]
    async fn second_build_replaces_first_staged_set() {
        let operator = test_key(1);
        let owner = test_key(2);
        let f = fixture(FakeHorizon::with_accounts(&[&operator, &owner])).await;
        let first = create_campaign(&f, CampaignStatus::Fund).await;
        let second = create_campaign(&f, CampaignStatus::Fund).await;

        f.builder
            .build_payment_transaction(
                vec![fund_op(first, 700, &f.operator, &f.owner)],
                OperationType::Fund,
            )
            .await
            .unwrap();
        f.builder
            .build_payment_transaction(
                vec![fund_op(second, 900, &f.operator, &f.owner)],
                OperationType::Fund,
            )
            .await
            .unwrap();

        let staged = f.staging.all().await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].campaign_id, second);
        assert_eq!(staged[0].amount, 900);
    }

    #[tokio::test]
    async fn donation_batch_requires_single_donor() {
        let operator = test_key(1);
        let donor = test_key(3);
        let other_donor = test_key(4);
        let f = fixture(FakeHorizon::with_accounts(&[&operator, &donor, &other_donor])).await;
        let id = create_campaign(&f, CampaignStatus::Active).await;

        let err = f
            .builder
            .build_payment_transaction(
                vec![
                    PaymentOperation {
                        campaign_id: id,
                        amount: 100,
                        source_public_key: donor.clone(),
                        destination_public_key: f.operator.clone(),
                    },
                    PaymentOperation {
                        campaign_id: id,
                        amount: 100,
                        source_public_key: other_donor,
                        destination_public_key: f.operator.clone(),
                    },
                ],
                OperationType::Donation,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(f.staging.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn self_donation_is_a_validation_failure() {
        let operator = test_key(1);
        let owner = test_key(2);
        let f = fixture(FakeHorizon::with_accounts(&[&operator, &owner])).await;
        let id = create_campaign(&f, CampaignStatus::Active).await;

        let err = f
            .builder
            .build_payment_transaction(
                vec![PaymentOperation {
                    campaign_id: id,
                    amount: 100,
                    source_public_key: f.owner.clone(),
                    destination_public_key: f.operator.clone(),
                }],
                OperationType::Donation,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(f.staging.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fund_requires_fund_status() {
        let operator = test_key(1);
        let owner = test_key(2);
        let f = fixture(FakeHorizon::with_accounts(&[&operator, &owner])).await;
        let id = create_campaign(&f, CampaignStatus::Active).await;

        let err = f
            .builder
            .build_payment_transaction(
                vec![fund_op(id, 1200, &f.operator, &f.owner)],
                OperationType::Fund,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn fee_oracle_failure_is_network_unavailable() {
        let operator = test_key(1);
        let owner = test_key(2);
        let mut gateway = FakeHorizon::with_accounts(&[&operator, &owner]);
        gateway.fee_unavailable = true;
        let f = fixture(gateway).await;
        let id = create_campaign(&f, CampaignStatus::Fund).await;

        let err = f
            .builder
            .build_payment_transaction(
                vec![fund_op(id, 1200, &f.operator, &f.owner)],
                OperationType::Fund,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NetworkUnavailable(_)));
        // The failed build cleared the stage and never populated it.
        assert_eq!(f.staging.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_and_nonpositive_batches_are_rejected() {
        let operator = test_key(1);
        let owner = test_key(2);
        let f = fixture(FakeHorizon::with_accounts(&[&operator, &owner])).await;
        let id = create_campaign(&f, CampaignStatus::Fund).await;

        let err = f
            .builder
            .build_payment_transaction(vec![], OperationType::Fund)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = f
            .builder
            .build_payment_transaction(
                vec![fund_op(id, 0, &f.operator, &f.owner)],
                OperationType::Fund,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::error::{AppError, AppResult};

/// Account state needed to build a transaction on top of it.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub account_id: String,
    pub sequence: i64,
}

/// Outcome of submitting a signed transaction to the network.
#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub successful: bool,
    pub hash: String,
}

/// The external payment network, reduced to the three capabilities the core
/// needs: resolve an account, quote the base fee, submit a signed envelope.
/// Engines depend on this trait so tests can swap in a fake.
#[async_trait]
pub trait HorizonGateway: Send + Sync {
    async fn load_account(&self, public_key: &str) -> AppResult<AccountRecord>;

    async fn fetch_base_fee(&self) -> AppResult<u32>;

    async fn submit_transaction(&self, envelope_xdr: &str) -> AppResult<SubmitResult>;
}

/// Production gateway: a Horizon-shaped HTTP API over reqwest. Every call is
/// bounded by the client-level timeout; a timed-out or unreachable Horizon
/// surfaces as `NetworkUnavailable`.
pub struct HorizonServer {
    base_url: String,
    client: reqwest::Client,
}

impl HorizonServer {
    pub fn new(base_url: String, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { base_url, client })
    }
}

#[async_trait]
impl HorizonGateway for HorizonServer {
    async fn load_account(&self, public_key: &str) -> AppResult<AccountRecord> {
        let url = format!("{}/accounts/{}", self.base_url, public_key);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!(
                "account {} does not exist on the network",
                public_key
            )));
        }
        if !response.status().is_success() {
            return Err(AppError::NetworkUnavailable(format!(
                "account lookup returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;

        // Horizon serves the sequence number as a string
        let sequence = body["sequence"]
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                AppError::NetworkUnavailable("malformed sequence in account record".to_string())
            })?;

        Ok(AccountRecord {
            account_id: public_key.to_string(),
            sequence,
        })
    }

    async fn fetch_base_fee(&self) -> AppResult<u32> {
        let url = format!("{}/fee_stats", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::NetworkUnavailable(format!(
                "fee stats returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;

        body["last_ledger_base_fee"]
            .as_str()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| {
                AppError::NetworkUnavailable("malformed base fee in fee stats".to_string())
            })
    }

    async fn submit_transaction(&self, envelope_xdr: &str) -> AppResult<SubmitResult> {
        let url = format!("{}/transactions", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[("tx", envelope_xdr)])
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let body: serde_json::Value = response.json().await?;

            let hash = body["hash"]
                .as_str()
                .ok_or_else(|| {
                    AppError::NetworkUnavailable(
                        "no transaction hash in submission response".to_string(),
                    )
                })?
                .to_string();

            let successful = body["successful"].as_bool().unwrap_or(true);

            info!("transaction submitted: {} (successful: {})", hash, successful);
            return Ok(SubmitResult { successful, hash });
        }

        let detail = response.text().await.unwrap_or_default();

        // Horizon answers 400 for a transaction it parsed and rejected; that
        // is a caller problem, not an outage.
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(AppError::Validation(format!(
                "transaction rejected by the network: {}",
                detail
            )));
        }

        Err(AppError::NetworkUnavailable(format!(
            "submission returned {}: {}",
            status, detail
        )))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;

    /// In-memory gateway for engine tests: a fixed set of existing accounts,
    /// a fixed base fee, switchable failure modes.
    pub(crate) struct FakeHorizon {
        pub accounts: HashSet<String>,
        pub base_fee: u32,
        pub fee_unavailable: bool,
        pub submit_successful: bool,
        pub submit_hash: String,
    }

    impl FakeHorizon {
        pub fn with_accounts(accounts: &[&str]) -> Self {
            Self {
                accounts: accounts.iter().map(|a| a.to_string()).collect(),
                base_fee: 100,
                fee_unavailable: false,
                submit_successful: true,
                submit_hash: "HASH".to_string(),
            }
        }
    }

    #[async_trait]
    impl HorizonGateway for FakeHorizon {
        async fn load_account(&self, public_key: &str) -> AppResult<AccountRecord> {
            if self.accounts.contains(public_key) {
                Ok(AccountRecord {
                    account_id: public_key.to_string(),
                    sequence: 4096,
                })
            } else {
                Err(AppError::NotFound(format!(
                    "account {} does not exist on the network",
                    public_key
                )))
            }
        }

        async fn fetch_base_fee(&self) -> AppResult<u32> {
            if self.fee_unavailable {
                Err(AppError::NetworkUnavailable("fee stats unreachable".to_string()))
            } else {
                Ok(self.base_fee)
            }
        }

        async fn submit_transaction(&self, _envelope_xdr: &str) -> AppResult<SubmitResult> {
            Ok(SubmitResult {
                successful: self.submit_successful,
                hash: self.submit_hash.clone(),
            })
        }
    }
}

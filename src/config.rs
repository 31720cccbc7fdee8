use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// Process-wide configuration, loaded once at startup and immutable after.
/// Engines receive what they need at construction; nothing reads the
/// environment past this point.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub horizon_url: String,
    pub network_passphrase: String,
    /// Platform operator account: receives donations, pays out funds/refunds.
    pub operator_public_key: String,
    pub categories: Vec<String>,
    /// Time bound (seconds) applied to built payment transactions.
    pub transaction_timeout_secs: u64,
    /// Timeout for individual Horizon HTTP calls.
    pub http_timeout_secs: u64,
    /// UTC hour for the daily settlement sweep.
    pub settlement_hour: u32,
    /// Sweep cadence: "daily" or "hourly".
    pub settlement_frequency: String,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        let operator_public_key = std::env::var("OPERATOR_PUBLIC_KEY")
            .map_err(|_| AppError::Config("OPERATOR_PUBLIC_KEY must be set".to_string()))?;

        let categories = std::env::var("CAMPAIGN_CATEGORIES")
            .map(|raw| {
                raw.split(',')
                    .map(|c| c.trim().to_lowercase())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| Self::default_categories());

        let settlement_hour: u32 = parse_env("SETTLEMENT_HOUR", 2)?;
        if settlement_hour > 23 {
            return Err(AppError::Config(
                "SETTLEMENT_HOUR must be between 0 and 23".to_string(),
            ));
        }

        let settlement_frequency = std::env::var("SETTLEMENT_FREQUENCY")
            .unwrap_or_else(|_| "daily".to_string())
            .to_lowercase();
        if settlement_frequency != "daily" && settlement_frequency != "hourly" {
            return Err(AppError::Config(
                "SETTLEMENT_FREQUENCY must be 'daily' or 'hourly'".to_string(),
            ));
        }

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://crowdfunding.db".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            horizon_url: std::env::var("HORIZON_URL")
                .unwrap_or_else(|_| "https://horizon-testnet.stellar.org".to_string()),
            network_passphrase: std::env::var("NETWORK_PASSPHRASE")
                .unwrap_or_else(|_| "Test SDF Network ; September 2015".to_string()),
            operator_public_key,
            categories,
            transaction_timeout_secs: parse_env("TRANSACTION_TIMEOUT_SECS", 30)?,
            http_timeout_secs: parse_env("HTTP_TIMEOUT_SECS", 10)?,
            settlement_hour,
            settlement_frequency,
        })
    }

    fn default_categories() -> Vec<String> {
        [
            "books",
            "education",
            "environment",
            "finance",
            "games",
            "music",
            "technology",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect()
    }

    pub fn is_known_category(&self, category: &str) -> bool {
        let lowered = category.to_lowercase();
        self.categories.iter().any(|c| c == &lowered)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> AppResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

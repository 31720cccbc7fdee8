// Settlement scheduler - runs the expiry sweep in the background.
//
// Daily (default): executes at a configured UTC hour, off-peak.
// Hourly: for deployments with short-deadline campaigns.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::settlement::engine::SettlementEngine;

/// Settlement schedule configuration
#[derive(Debug, Clone)]
pub struct SettlementScheduleConfig {
    pub frequency: SettlementFrequency,
    /// UTC hour to execute the daily sweep (0-23)
    pub execution_hour: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementFrequency {
    Daily,
    Hourly,
}

/// Settlement scheduler - coordinates the periodic expiry sweep.
pub struct SettlementScheduler {
    config: SettlementScheduleConfig,
    engine: Arc<SettlementEngine>,
}

impl SettlementScheduler {
    pub fn new(config: SettlementScheduleConfig, engine: Arc<SettlementEngine>) -> Self {
        Self { config, engine }
    }

    /// Start the scheduler (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let config = self.config.clone();
        let engine = self.engine.clone();

        tokio::spawn(async move {
            match config.frequency {
                SettlementFrequency::Daily => Self::run_daily_scheduler(&config, &engine).await,
                SettlementFrequency::Hourly => Self::run_hourly_scheduler(&engine).await,
            }
        })
    }

    /// Daily scheduler - runs once per day at the configured hour
    async fn run_daily_scheduler(config: &SettlementScheduleConfig, engine: &Arc<SettlementEngine>) {
        loop {
            let now = Utc::now();
            let next_execution = Self::calculate_next_daily_execution(now, config.execution_hour);
            let duration_until_execution = next_execution.signed_duration_since(now);

            if duration_until_execution.num_seconds() > 0 {
                info!(
                    "⏰ Next settlement sweep scheduled for {} UTC",
                    next_execution.format("%H:%M:%S")
                );

                tokio::time::sleep(Duration::from_secs(
                    duration_until_execution.num_seconds() as u64,
                ))
                .await;
            }

            Self::run_sweep(engine).await;
        }
    }

    /// Hourly scheduler - runs every hour
    async fn run_hourly_scheduler(engine: &Arc<SettlementEngine>) {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;
            Self::run_sweep(engine).await;
        }
    }

    // A failed sweep must never kill the loop; log and wait for the next tick.
    async fn run_sweep(engine: &Arc<SettlementEngine>) {
        info!("🔄 Starting settlement sweep");

        match engine.settle_expired_campaigns().await {
            Ok(summary) => {
                if !summary.failures.is_empty() {
                    error!(
                        "❌ Settlement sweep finished with {} failure(s)",
                        summary.failures.len()
                    );
                } else {
                    info!("✓ Settlement sweep completed");
                }
            }
            Err(e) => error!("❌ Settlement sweep failed: {:?}", e),
        }
    }

    /// Calculate next daily execution time
    fn calculate_next_daily_execution(now: DateTime<Utc>, execution_hour: u32) -> DateTime<Utc> {
        let mut next = now
            .date_naive()
            .and_hms_opt(execution_hour, 0, 0)
            .unwrap();
        let next_dt = Utc.from_utc_datetime(&next);

        // If execution time has passed today, schedule for tomorrow
        if next_dt <= now {
            next = (now.date_naive() + chrono::Duration::days(1))
                .and_hms_opt(execution_hour, 0, 0)
                .unwrap();
            Utc.from_utc_datetime(&next)
        } else {
            next_dt
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn test_calculate_next_daily_execution() {
        // Current time: 2024-01-01 10:00:00 UTC
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        // Execution hour: 14:00 (today)
        let next = SettlementScheduler::calculate_next_daily_execution(now, 14);
        assert_eq!(next.hour(), 14);
        assert_eq!(next.day(), 1);

        // Execution hour: 09:00 (already passed, so tomorrow)
        let next = SettlementScheduler::calculate_next_daily_execution(now, 9);
        assert_eq!(next.hour(), 9);
        assert_eq!(next.day(), 2);
    }
}

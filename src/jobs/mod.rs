//! Scheduled Jobs
//!
//! Background maintenance separate from recovery: expired idempotency
//! records and processed outbox rows accumulate indefinitely unless swept
//! on a schedule.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::interval;

use crate::idempotency::IdempotencyCache;
use crate::outbox::Outbox;

// =========================================================================
// Idempotency Key Cleanup
// =========================================================================

/// Delete idempotency records past their TTL.
pub async fn cleanup_idempotency_keys(cache: &IdempotencyCache) -> Result<u64, JobError> {
    let rows_deleted = cache.cleanup().await?;

    if rows_deleted > 0 {
        tracing::info!(rows_deleted, "cleaned up expired idempotency keys");
    }

    Ok(rows_deleted)
}

// =========================================================================
// Outbox Cleanup
// =========================================================================

/// Delete outbox rows that every consumer has already processed, older
/// than the retention window.
pub async fn cleanup_outbox(outbox: &Outbox, older_than_days: i64) -> Result<u64, JobError> {
    let rows_deleted = outbox.cleanup(older_than_days).await?;

    if rows_deleted > 0 {
        tracing::info!(rows_deleted, "cleaned up processed outbox rows");
    }

    Ok(rows_deleted)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for the maintenance job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for idempotency key cleanup (default: 1 hour)
    pub idempotency_cleanup_interval: Duration,
    /// Interval for outbox cleanup (default: 1 hour)
    pub outbox_cleanup_interval: Duration,
    /// Retention window passed to outbox cleanup
    pub outbox_retention_days: i64,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            idempotency_cleanup_interval: Duration::from_secs(3600),
            outbox_cleanup_interval: Duration::from_secs(3600),
            outbox_retention_days: 7,
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks alongside recovery
pub struct JobScheduler {
    idempotency: IdempotencyCache,
    outbox: Outbox,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(pool: PgPool, idempotency: IdempotencyCache) -> Self {
        Self {
            idempotency,
            outbox: Outbox::new(pool),
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(pool: PgPool, idempotency: IdempotencyCache, config: JobSchedulerConfig) -> Self {
        Self {
            idempotency,
            outbox: Outbox::new(pool),
            config,
        }
    }

    /// Start the job scheduler in the background
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!("maintenance job scheduler started");

        let mut idempotency_interval = interval(self.config.idempotency_cleanup_interval);
        let mut outbox_interval = interval(self.config.outbox_cleanup_interval);

        loop {
            tokio::select! {
                _ = idempotency_interval.tick() => {
                    if let Err(e) = cleanup_idempotency_keys(&self.idempotency).await {
                        tracing::error!(error = %e, "idempotency key cleanup failed");
                    }
                }
                _ = outbox_interval.tick() => {
                    if let Err(e) = cleanup_outbox(&self.outbox, self.config.outbox_retention_days).await {
                        tracing::error!(error = %e, "outbox cleanup failed");
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match cleanup_idempotency_keys(&self.idempotency).await {
            Ok(count) => report.idempotency_keys_deleted = count,
            Err(e) => report.errors.push(format!("idempotency cleanup: {}", e)),
        }

        match cleanup_outbox(&self.outbox, self.config.outbox_retention_days).await {
            Ok(count) => report.outbox_rows_deleted = count,
            Err(e) => report.errors.push(format!("outbox cleanup: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub idempotency_keys_deleted: u64,
    pub outbox_rows_deleted: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("idempotency error: {0}")]
    Idempotency(#[from] crate::idempotency::IdempotencyError),

    #[error("outbox error: {0}")]
    Outbox(#[from] crate::outbox::OutboxError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.idempotency_cleanup_interval, Duration::from_secs(3600));
        assert_eq!(config.outbox_cleanup_interval, Duration::from_secs(3600));
        assert_eq!(config.outbox_retention_days, 7);
    }

    #[test]
    fn test_maintenance_report_default() {
        let report = MaintenanceReport::default();
        assert_eq!(report.idempotency_keys_deleted, 0);
        assert_eq!(report.outbox_rows_deleted, 0);
        assert_eq!(report.errors.len(), 0);
    }
}

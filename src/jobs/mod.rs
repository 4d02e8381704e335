//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance: the vault invariant sweep and
//! expired idempotency key cleanup.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use uuid::Uuid;

use crate::config::LedgerSettings;
use crate::domain::ErrorClass;
use crate::error::AppError;
use crate::handlers::AdminHandler;
use crate::ledger::{LedgerError, LedgerStore};

// =========================================================================
// Invariant Sweep
// =========================================================================

/// Outcome of one sweep over every vault
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    pub vaults_checked: u64,
    pub violations: Vec<Uuid>,
}

/// Check every vault's balance equation and replay its movement log.
///
/// Violations are logged at error and reported; nothing is corrected.
pub async fn invariant_sweep(
    store: &Arc<dyn LedgerStore>,
    settings: &Arc<LedgerSettings>,
) -> Result<SweepResult, JobError> {
    let admin = AdminHandler::new(store.clone(), settings.clone());
    let mut result = SweepResult::default();

    for vault in store.vaults().await? {
        result.vaults_checked += 1;
        match admin.verify_invariant(vault.id).await {
            Ok(_) => {}
            Err(AppError::Domain(e)) if e.class() == ErrorClass::Invariant => {
                tracing::error!(vault_id = %vault.id, error = %e, "Vault invariant violated");
                result.violations.push(vault.id);
            }
            Err(AppError::Ledger(e)) => return Err(JobError::Ledger(e)),
            Err(e) => return Err(JobError::Check(e.to_string())),
        }
    }

    if result.violations.is_empty() {
        tracing::debug!(vaults_checked = result.vaults_checked, "Invariant sweep clean");
    }

    Ok(result)
}

// =========================================================================
// Expired Idempotency Key Deletion Job
// =========================================================================

/// Delete expired idempotency keys
pub async fn delete_expired_idempotency_keys(store: &Arc<dyn LedgerStore>) -> Result<u64, JobError> {
    let rows_deleted = store.purge_expired_idempotency(Utc::now()).await?;

    if rows_deleted > 0 {
        tracing::info!(rows_deleted = rows_deleted, "Deleted expired idempotency keys");
    }

    Ok(rows_deleted)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for the vault invariant sweep (default: 5 minutes)
    pub invariant_check_interval: Duration,
    /// Interval for idempotency key cleanup (default: 1 minute)
    pub idempotency_cleanup_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            invariant_check_interval: Duration::from_secs(300),
            idempotency_cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    store: Arc<dyn LedgerStore>,
    settings: Arc<LedgerSettings>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(store: Arc<dyn LedgerStore>, settings: Arc<LedgerSettings>) -> Self {
        Self::with_config(store, settings, JobSchedulerConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(store: Arc<dyn LedgerStore>, settings: Arc<LedgerSettings>, config: JobSchedulerConfig) -> Self {
        Self { store, settings, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut invariant_interval = interval(self.config.invariant_check_interval);
        let mut idempotency_interval = interval(self.config.idempotency_cleanup_interval);

        loop {
            tokio::select! {
                _ = invariant_interval.tick() => {
                    if let Err(e) = invariant_sweep(&self.store, &self.settings).await {
                        tracing::error!(error = %e, "Invariant sweep failed");
                    }
                }
                _ = idempotency_interval.tick() => {
                    if let Err(e) = delete_expired_idempotency_keys(&self.store).await {
                        tracing::error!(error = %e, "Idempotency key deletion failed");
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match invariant_sweep(&self.store, &self.settings).await {
            Ok(sweep) => {
                report.vaults_checked = sweep.vaults_checked;
                report.invariant_violations = sweep.violations;
            }
            Err(e) => report.errors.push(format!("Invariant sweep: {}", e)),
        }

        match delete_expired_idempotency_keys(&self.store).await {
            Ok(count) => report.idempotency_keys_deleted = count,
            Err(e) => report.errors.push(format!("Idempotency deletion: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub vaults_checked: u64,
    pub invariant_violations: Vec<Uuid>,
    pub idempotency_keys_deleted: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Check failed: {0}")]
    Check(String),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Money, OperationContext};
    use crate::handlers::ProvisionVaultCommand;
    use crate::idempotency::IdempotencyRecord;
    use crate::ledger::MemoryLedgerStore;

    async fn scheduler_with_vault() -> (JobScheduler, Arc<dyn LedgerStore>, Uuid) {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
        let settings = Arc::new(LedgerSettings::default());
        let vault = AdminHandler::new(store.clone(), settings.clone())
            .provision_vault(
                ProvisionVaultCommand {
                    code: "BOV-01".into(),
                    name: "Main".into(),
                    initial_balance: Money::from_units(5000).unwrap(),
                    per_allocation_limit: Money::from_units(1000).unwrap(),
                    total_allocations_limit: Money::from_units(3000).unwrap(),
                },
                None,
                &OperationContext::for_actor(Uuid::new_v4()),
            )
            .await
            .unwrap()
            .vault;
        (JobScheduler::new(store.clone(), settings), store, vault.id)
    }

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.invariant_check_interval, Duration::from_secs(300));
        assert_eq!(config.idempotency_cleanup_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_maintenance_report_default() {
        let report = MaintenanceReport::default();
        assert_eq!(report.vaults_checked, 0);
        assert!(report.invariant_violations.is_empty());
        assert_eq!(report.errors.len(), 0);
    }

    #[tokio::test]
    async fn test_clean_sweep() {
        let (scheduler, _, _) = scheduler_with_vault().await;
        let report = scheduler.run_all_once().await;

        assert_eq!(report.vaults_checked, 1);
        assert!(report.invariant_violations.is_empty());
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_reports_corrupted_cache() {
        let (scheduler, store, vault_id) = scheduler_with_vault().await;

        // Write a cache that no longer matches the log.
        let mut tx = store.begin().await.unwrap();
        let mut vault = tx.lock_vault(vault_id).await.unwrap().unwrap();
        vault.total_balance = Money::from_units(9999).unwrap();
        tx.update_vault(&vault).await.unwrap();
        tx.commit().await.unwrap();

        let report = scheduler.run_all_once().await;
        assert_eq!(report.invariant_violations, vec![vault_id]);
    }

    #[tokio::test]
    async fn test_expired_keys_are_deleted() {
        let (scheduler, store, _) = scheduler_with_vault().await;
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        for (key, expires_at) in [("old", now - chrono::Duration::hours(1)), ("live", now + chrono::Duration::hours(1))] {
            tx.save_idempotency_record(&IdempotencyRecord {
                key: key.to_string(),
                operation: "record_movement".to_string(),
                request_hash: String::new(),
                response: serde_json::Value::Null,
                created_at: now - chrono::Duration::hours(2),
                expires_at,
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let report = scheduler.run_all_once().await;
        assert_eq!(report.idempotency_keys_deleted, 1);
    }
}

//! Account health monitor.
//!
//! Probes each active account with a fresh session, escalates consecutive
//! transient failures to `disabled`, blocks on terminal signals, and
//! reports a per-sweep tally to the notifier.

pub mod counters;
pub mod schedule;

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use counters::ErrorCounter;

use crate::accounts::{Account, AccountStatus};
use crate::config::MonitorConfig;
use crate::error::{DatabaseError, SessionError};
use crate::notify::Notifier;
use crate::session::{FailureClass, SessionFactory, bounded, classify, close};
use crate::store::AccountStore;

/// Tally of one sweep. `total == active + disabled + blocked`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub total: usize,
    pub active: usize,
    pub disabled: usize,
    pub blocked: usize,
}

impl SweepReport {
    fn tally(&mut self, status: AccountStatus) {
        match status {
            AccountStatus::Active => self.active += 1,
            AccountStatus::Disabled => self.disabled += 1,
            AccountStatus::Blocked => self.blocked += 1,
        }
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} active={} disabled={} blocked={}",
            self.total, self.active, self.disabled, self.blocked
        )
    }
}

/// What a single health check concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Healthy,
    /// Transient failure below the threshold.
    Failing { consecutive: u32 },
    Disabled,
    Blocked,
    /// No credential yet; nothing to probe.
    Unauthorized,
}

impl CheckOutcome {
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Status the account should hold after this outcome.
    pub fn implied_status(self) -> AccountStatus {
        match self {
            Self::Healthy | Self::Failing { .. } | Self::Unauthorized => AccountStatus::Active,
            Self::Disabled => AccountStatus::Disabled,
            Self::Blocked => AccountStatus::Blocked,
        }
    }
}

pub struct MonitorDeps {
    pub store: Arc<dyn AccountStore>,
    pub sessions: Arc<dyn SessionFactory>,
    pub notifier: Arc<dyn Notifier>,
    /// Shared with the orchestrator, which clears an account's streak on
    /// every status change it makes.
    pub errors: Arc<ErrorCounter>,
}

pub struct HealthMonitor {
    config: MonitorConfig,
    store: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionFactory>,
    notifier: Arc<dyn Notifier>,
    errors: Arc<ErrorCounter>,
    sweep_lock: Mutex<()>,
}

impl HealthMonitor {
    pub fn new(config: MonitorConfig, deps: MonitorDeps) -> Self {
        Self {
            config,
            store: deps.store,
            sessions: deps.sessions,
            notifier: deps.notifier,
            errors: deps.errors,
            sweep_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Consecutive transient failures recorded for `account_id`.
    pub async fn error_count(&self, account_id: i64) -> u32 {
        self.errors.get(account_id).await
    }

    /// Probe one account. True only when the probe confirmed the session.
    pub async fn check_account(&self, account: &Account) -> bool {
        self.check_account_detailed(account).await.is_healthy()
    }

    /// Probe one account and apply the resulting lifecycle transition.
    pub async fn check_account_detailed(&self, account: &Account) -> CheckOutcome {
        if !account.is_authorized() {
            debug!(account_id = account.id, "Skipping check for unauthorized account");
            return CheckOutcome::Unauthorized;
        }

        let mut client = self.sessions.open(account);
        let timeout = self.config.probe_timeout;
        let probed = async {
            bounded("connect", timeout, client.connect()).await?;
            bounded("probe_identity", timeout, client.probe_identity()).await
        }
        .await;
        close(client.as_mut(), timeout).await;

        match probed {
            Ok(identity) => {
                self.errors.clear(account.id).await;
                debug!(
                    account_id = account.id,
                    user_id = identity.user_id,
                    "Account healthy"
                );
                CheckOutcome::Healthy
            }
            Err(e) => self.record_failure(account, &e).await,
        }
    }

    async fn record_failure(&self, account: &Account, error: &SessionError) -> CheckOutcome {
        match classify(error) {
            FailureClass::Terminal(signal) => {
                error!(account_id = account.id, phone = %account.phone, signal = %signal, "Account blocked by platform");
                self.errors.clear(account.id).await;
                self.transition(account, AccountStatus::Blocked, &error.to_string())
                    .await;
                CheckOutcome::Blocked
            }
            FailureClass::Transient => {
                let consecutive = self.errors.record_failure(account.id).await;
                warn!(
                    account_id = account.id,
                    phone = %account.phone,
                    consecutive,
                    threshold = self.config.failure_threshold,
                    error = %error,
                    "Account check failed"
                );
                if consecutive < self.config.failure_threshold {
                    return CheckOutcome::Failing { consecutive };
                }

                self.errors.clear(account.id).await;
                let reason = format!("{consecutive} consecutive failures, last: {error}");
                self.transition(account, AccountStatus::Disabled, &reason)
                    .await;
                CheckOutcome::Disabled
            }
        }
    }

    /// Demote the account and notify when the stored status actually moved.
    async fn transition(&self, account: &Account, status: AccountStatus, reason: &str) {
        match self.store.demote_status(account.id, status).await {
            Ok(true) => {
                let mut updated = account.clone();
                updated.status = status;
                let notified = match status {
                    AccountStatus::Blocked => self.notifier.account_blocked(&updated, reason).await,
                    AccountStatus::Disabled => {
                        self.notifier.account_disabled(&updated, reason).await
                    }
                    AccountStatus::Active => Ok(()),
                };
                if let Err(e) = notified {
                    warn!(account_id = account.id, error = %e, "Failed to deliver status notification");
                }
                info!(account_id = account.id, status = %status, "Account status changed");
            }
            Ok(false) => {
                debug!(account_id = account.id, status = %status, "Account already at or past status");
            }
            Err(e) => {
                error!(account_id = account.id, status = %status, error = %e, "Failed to persist status change");
            }
        }
    }

    /// Check every active, authorized account and report the tally.
    ///
    /// Sweeps never overlap; a second caller waits for the first to finish.
    pub async fn sweep_all(&self) -> Result<SweepReport, DatabaseError> {
        let _sweep = self.sweep_lock.lock().await;

        let accounts: Vec<Account> = self
            .store
            .get_active_accounts()
            .await?
            .into_iter()
            .filter(Account::is_authorized)
            .collect();
        debug!(count = accounts.len(), "Starting account sweep");

        let outcomes: Vec<(Account, CheckOutcome)> = futures::stream::iter(accounts)
            .map(|account| async move {
                let outcome = self.check_account_detailed(&account).await;
                (account, outcome)
            })
            .buffer_unordered(self.config.sweep_concurrency.max(1))
            .collect()
            .await;

        let mut report = SweepReport {
            total: outcomes.len(),
            ..SweepReport::default()
        };
        for (account, outcome) in outcomes {
            let status = match self.store.get_by_id(account.id).await {
                Ok(Some(fresh)) => fresh.status,
                Ok(None) => outcome.implied_status(),
                Err(e) => {
                    warn!(account_id = account.id, error = %e, "Failed to re-read account after check");
                    outcome.implied_status()
                }
            };
            report.tally(status);
        }

        info!(%report, "Account sweep finished");
        if let Err(e) = self.notifier.status_report(&report).await {
            warn!(error = %e, "Failed to deliver sweep report");
        }
        Ok(report)
    }
}

/// Run `sweep_all` on `schedule`, each run delayed by up to `max_jitter`.
pub fn spawn_sweep_task(
    monitor: Arc<HealthMonitor>,
    schedule: cron::Schedule,
    max_jitter: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(delay) = schedule::next_delay(&schedule, max_jitter) {
            tokio::time::sleep(delay).await;
            if let Err(e) = monitor.sweep_all().await {
                error!(error = %e, "Account sweep failed");
            }
        }
        warn!("Sweep schedule has no upcoming runs; monitor task exiting");
    })
}

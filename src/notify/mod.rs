//! Operational notifications: sweep reports and lifecycle events.

pub mod telegram;

pub use telegram::TelegramNotifier;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::accounts::Account;
use crate::error::NotifyError;
use crate::monitor::SweepReport;

/// Receives the pool's operational events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tally emitted after every health sweep.
    async fn status_report(&self, report: &SweepReport) -> Result<(), NotifyError>;

    /// An account hit a terminal signal and was blocked.
    async fn account_blocked(&self, account: &Account, reason: &str) -> Result<(), NotifyError>;

    /// An account crossed the consecutive-failure threshold and was disabled.
    async fn account_disabled(&self, account: &Account, reason: &str) -> Result<(), NotifyError>;
}

/// Writes every event to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn status_report(&self, report: &SweepReport) -> Result<(), NotifyError> {
        info!(
            total = report.total,
            active = report.active,
            disabled = report.disabled,
            blocked = report.blocked,
            "Account sweep report"
        );
        Ok(())
    }

    async fn account_blocked(&self, account: &Account, reason: &str) -> Result<(), NotifyError> {
        warn!(account_id = account.id, phone = %account.phone, reason, "Account blocked");
        Ok(())
    }

    async fn account_disabled(&self, account: &Account, reason: &str) -> Result<(), NotifyError> {
        warn!(account_id = account.id, phone = %account.phone, reason, "Account disabled");
        Ok(())
    }
}

/// Delivers to several notifiers. Every target is attempted; the first
/// failure is returned after all have run.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.targets.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn first_error(results: Vec<Result<(), NotifyError>>) -> Result<(), NotifyError> {
    results.into_iter().collect()
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn status_report(&self, report: &SweepReport) -> Result<(), NotifyError> {
        let mut results = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            results.push(target.status_report(report).await);
        }
        first_error(results)
    }

    async fn account_blocked(&self, account: &Account, reason: &str) -> Result<(), NotifyError> {
        let mut results = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            results.push(target.account_blocked(account, reason).await);
        }
        first_error(results)
    }

    async fn account_disabled(&self, account: &Account, reason: &str) -> Result<(), NotifyError> {
        let mut results = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            results.push(target.account_disabled(account, reason).await);
        }
        first_error(results)
    }
}

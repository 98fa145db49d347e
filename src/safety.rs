//! Safety policy: decides whether an account may send right now.
//!
//! Eligibility is a pure function of the account's counters and timestamps.
//! It must be evaluated fresh on every send attempt; nothing here is cached.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::accounts::Account;
use crate::config::PoolConfig;

/// Why an account was judged ineligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    /// Status is not active.
    Inactive,
    /// Daily cap reached.
    DailyCapReached,
    /// Last send was too recent.
    TooSoon,
}

/// Per-account rate limiting rules.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    daily_cap: u32,
    min_interval: Duration,
}

impl SafetyPolicy {
    pub fn new(daily_cap: u32, min_interval: Duration) -> Self {
        Self {
            daily_cap,
            min_interval,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.daily_message_cap, config.min_send_interval)
    }

    pub fn daily_cap(&self) -> u32 {
        self.daily_cap
    }

    /// True iff the account is active, under the daily cap, and outside the
    /// spacing window.
    pub fn is_eligible(&self, account: &Account) -> bool {
        self.check_at(account, Utc::now()).is_ok()
    }

    /// Evaluate eligibility against an explicit clock.
    pub fn check_at(&self, account: &Account, now: DateTime<Utc>) -> Result<(), Ineligible> {
        if !account.is_active() {
            return Err(Ineligible::Inactive);
        }
        if account.daily_messages >= self.daily_cap {
            return Err(Ineligible::DailyCapReached);
        }
        if let Some(last_used) = account.last_used
            && !self.min_interval.is_zero()
        {
            let since = now.signed_duration_since(last_used);
            if since < chrono::Duration::from_std(self.min_interval).unwrap_or(chrono::Duration::MAX)
            {
                return Err(Ineligible::TooSoon);
            }
        }
        Ok(())
    }

    /// Record a confirmed send on the in-memory account. Call exactly once
    /// per successful send, after the remote side accepted it.
    pub fn record_send(&self, account: &mut Account) {
        account.daily_messages = account.daily_messages.saturating_add(1);
        account.last_used = Some(Utc::now());
    }

    /// Messages the account may still send today.
    pub fn remaining_today(&self, account: &Account) -> u32 {
        self.daily_cap.saturating_sub(account.daily_messages)
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

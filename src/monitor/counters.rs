//! Consecutive soft-failure counter per account.
//!
//! Lives only in memory. A restart forgives every account mid-escalation.

use std::collections::HashMap;

use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct ErrorCounter {
    counts: Mutex<HashMap<i64, u32>>,
}

impl ErrorCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more consecutive failure and return the new total.
    pub async fn record_failure(&self, account_id: i64) -> u32 {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(account_id).or_insert(0);
        *count += 1;
        *count
    }

    /// Forget the account's failures.
    pub async fn clear(&self, account_id: i64) {
        self.counts.lock().await.remove(&account_id);
    }

    /// Current count; zero when absent.
    pub async fn get(&self, account_id: i64) -> u32 {
        self.counts
            .lock()
            .await
            .get(&account_id)
            .copied()
            .unwrap_or(0)
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.counts.lock().await.len()
    }
}

//! `AccountStore` trait: the durable record of accounts.
//!
//! The store is the single source of truth for status and counters. Counter
//! updates are atomic increments in the backend, never read-modify-write of a
//! cached value.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::accounts::{Account, AccountStatus};
use crate::error::DatabaseError;

/// Backend-agnostic account persistence.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create an active, unauthorized account with zeroed counters.
    /// A duplicate phone is a [`DatabaseError::Constraint`].
    async fn create_account(&self, phone: &str) -> Result<Account, DatabaseError>;

    async fn get_by_phone(&self, phone: &str) -> Result<Option<Account>, DatabaseError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Account>, DatabaseError>;

    /// All active accounts, least-loaded first.
    async fn get_active_accounts(&self) -> Result<Vec<Account>, DatabaseError>;

    /// Every account regardless of status, by id.
    async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError>;

    /// Persist the session credential. Returns false if the account is gone.
    async fn update_session(
        &self,
        id: i64,
        credential: &SecretString,
    ) -> Result<bool, DatabaseError>;

    /// Administrative status write keyed by phone.
    async fn update_status(&self, phone: &str, status: AccountStatus)
    -> Result<bool, DatabaseError>;

    /// Administrative status write keyed by id.
    async fn update_status_by_id(
        &self,
        id: i64,
        status: AccountStatus,
    ) -> Result<bool, DatabaseError>;

    /// Move an account to a strictly more severe status. Returns false when
    /// the account is missing or already at or beyond `status`.
    async fn demote_status(&self, id: i64, status: AccountStatus) -> Result<bool, DatabaseError>;

    /// Atomically bump the daily counter and stamp `last_used`.
    async fn increment_message_count(&self, id: i64) -> Result<(), DatabaseError>;

    /// Zero every daily counter. Returns the number of rows touched.
    async fn reset_daily_counts(&self) -> Result<usize, DatabaseError>;
}

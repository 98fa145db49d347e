//! libSQL backend: async `AccountStore` implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::accounts::{Account, AccountStatus};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::AccountStore;

/// libSQL account store.
pub struct LibSqlAccountStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlAccountStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(store.conn()).await?;
        info!(path = %path.display(), "Account database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(store.conn()).await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_accounts(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut accounts = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let account = row_to_account(&row).map_err(|e| {
                        let id = row.get::<i64>(0).ok();
                        warn!(op, account_id = ?id, error = %e, "Unreadable account row");
                        DatabaseError::Serialization(format!("{op}: account {id:?}: {e}"))
                    })?;
                    accounts.push(account);
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
            }
        }
        Ok(accounts)
    }

    async fn query_one(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Option<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_account(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

const ACCOUNT_COLUMNS: &str =
    "id, phone, session, status, daily_messages, last_used, last_warmup, created_at, updated_at";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Map a libsql Row to an Account.
///
/// Column order matches ACCOUNT_COLUMNS.
fn row_to_account(row: &libsql::Row) -> Result<Account, DatabaseError> {
    let field = |e: libsql::Error| DatabaseError::Serialization(format!("account row: {e}"));

    let status_str: String = row.get(3).map_err(field)?;
    let status: AccountStatus = status_str
        .parse()
        .map_err(|e: String| DatabaseError::Serialization(e))?;
    let daily: i64 = row.get(4).map_err(field)?;
    let daily_messages = u32::try_from(daily).map_err(|_| {
        DatabaseError::Serialization(format!("daily_messages out of range: {daily}"))
    })?;
    let last_used: Option<String> = row.get::<String>(5).ok();
    let last_warmup: Option<String> = row.get::<String>(6).ok();
    let created_str: String = row.get(7).map_err(field)?;
    let updated_str: String = row.get(8).map_err(field)?;

    Ok(Account {
        id: row.get(0).map_err(field)?,
        phone: row.get(1).map_err(field)?,
        session: row
            .get::<String>(2)
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from),
        status,
        daily_messages,
        last_used: parse_optional_datetime(&last_used),
        last_warmup: parse_optional_datetime(&last_warmup),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl AccountStore for LibSqlAccountStore {
    async fn create_account(&self, phone: &str) -> Result<Account, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO accounts (phone, status, daily_messages, created_at, updated_at)
                     VALUES (?1, 'active', 0, ?2, ?2)
                     RETURNING {ACCOUNT_COLUMNS}"
                ),
                params![phone, now],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::Constraint(format!("account {phone} already exists"))
                } else {
                    DatabaseError::Query(format!("create_account: {e}"))
                }
            })?;

        let row = rows
            .next()
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::Constraint(format!("account {phone} already exists"))
                } else {
                    DatabaseError::Query(format!("create_account: {e}"))
                }
            })?
            .ok_or_else(|| DatabaseError::Query("create_account: no row returned".to_string()))?;

        let account = row_to_account(&row)?;
        debug!(account_id = account.id, phone = phone, "Account created");
        Ok(account)
    }

    async fn get_by_phone(&self, phone: &str) -> Result<Option<Account>, DatabaseError> {
        self.query_one(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE phone = ?1"),
            params![phone],
            "get_by_phone",
        )
        .await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Account>, DatabaseError> {
        self.query_one(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
            params![id],
            "get_by_id",
        )
        .await
    }

    async fn get_active_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        self.query_accounts(
            &format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE status = 'active'
                 ORDER BY daily_messages ASC, last_used ASC, id ASC"
            ),
            (),
            "get_active_accounts",
        )
        .await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        self.query_accounts(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id ASC"),
            (),
            "list_accounts",
        )
        .await
    }

    async fn update_session(
        &self,
        id: i64,
        credential: &SecretString,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE accounts SET session = ?1, updated_at = ?2 WHERE id = ?3",
                params![credential.expose_secret(), now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_session: {e}")))?;

        debug!(account_id = id, updated = count > 0, "Session credential stored");
        Ok(count > 0)
    }

    async fn update_status(
        &self,
        phone: &str,
        status: AccountStatus,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE accounts SET status = ?1, updated_at = ?2 WHERE phone = ?3",
                params![status.as_str(), now, phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_status: {e}")))?;

        debug!(phone = phone, status = %status, updated = count > 0, "Account status updated");
        Ok(count > 0)
    }

    async fn update_status_by_id(
        &self,
        id: i64,
        status: AccountStatus,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE accounts SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_status_by_id: {e}")))?;

        debug!(account_id = id, status = %status, updated = count > 0, "Account status updated");
        Ok(count > 0)
    }

    async fn demote_status(&self, id: i64, status: AccountStatus) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE accounts SET status = ?1, updated_at = ?2
                 WHERE id = ?3
                   AND (CASE status WHEN 'active' THEN 0 WHEN 'disabled' THEN 1 ELSE 2 END) < ?4",
                params![status.as_str(), now, id, status.severity() as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("demote_status: {e}")))?;

        Ok(count > 0)
    }

    async fn increment_message_count(&self, id: i64) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE accounts
                 SET daily_messages = daily_messages + 1, last_used = ?1, updated_at = ?1
                 WHERE id = ?2",
                params![now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("increment_message_count: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "account".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn reset_daily_counts(&self) -> Result<usize, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE accounts SET daily_messages = 0, updated_at = ?1 WHERE daily_messages > 0",
                params![now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reset_daily_counts: {e}")))?;

        if count > 0 {
            info!(count, "Daily message counters reset");
        }
        Ok(count as usize)
    }
}

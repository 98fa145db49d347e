//! Account model and lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an account.
///
/// Automatic transitions only ever move towards a more severe status
/// (`Active` → `Disabled` → `Blocked`). Returning to `Active` happens only
/// through re-authorization or an administrative override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Usable for sending.
    Active,
    /// Escalated after repeated transient failures.
    Disabled,
    /// The platform reported a ban or revoked credential.
    Blocked,
}

impl AccountStatus {
    /// Ordering used by the monotonic-downward rule.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Disabled => 1,
            Self::Blocked => 2,
        }
    }

    /// Whether the core may move an account from this status to `target`
    /// on its own.
    pub fn can_transition_to(&self, target: AccountStatus) -> bool {
        target.severity() > self.severity()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            "blocked" => Ok(Self::Blocked),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// One sending identity in the pool.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    /// Phone number in E.164 form; unique across the pool.
    pub phone: String,
    /// Durable session credential, `None` until authorization completes.
    pub session: Option<SecretString>,
    pub status: AccountStatus,
    /// Messages sent today. Reset by an external daily job.
    pub daily_messages: u32,
    pub last_used: Option<DateTime<Utc>>,
    pub last_warmup: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A freshly enrolled account: active, unauthorized, counters zero.
    pub fn new(id: i64, phone: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            phone: phone.into(),
            session: None,
            status: AccountStatus::Active,
            daily_messages: 0,
            last_used: None,
            last_warmup: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{}, {})", self.phone, self.id, self.status)
    }
}

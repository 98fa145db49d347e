//! Remote session boundary: the live connection for one account.
//!
//! The transport itself lives behind [`AccountClient`]. Everything that enters
//! the core from a session is a [`SessionError`], classified once by
//! [`classify`] into terminal or transient.

pub mod classify;
pub mod gateway;

pub use classify::{FailureClass, TerminalSignal, classify};
pub use gateway::HttpGateway;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::accounts::Account;
use crate::error::SessionError;

/// Result of a self-identity probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// A live connection for one account.
#[async_trait]
pub trait AccountClient: Send {
    /// Open the connection.
    async fn connect(&mut self) -> Result<(), SessionError>;

    /// Close the connection. Never fails; errors are logged by the implementation.
    async fn disconnect(&mut self);

    /// Ask the platform to deliver a one-time code to `phone`.
    async fn request_authorization_code(&mut self, phone: &str) -> Result<(), SessionError>;

    /// Exchange the code for a durable session credential.
    async fn complete_authorization(&mut self, code: &str) -> Result<SecretString, SessionError>;

    /// Ask the platform who we are. Terminal signals surface here first.
    async fn probe_identity(&mut self) -> Result<Identity, SessionError>;

    /// Send a text message to `target` (username or phone).
    async fn send_text(&mut self, target: &str, text: &str) -> Result<(), SessionError>;
}

/// Creates unconnected clients for accounts.
pub trait SessionFactory: Send + Sync {
    fn open(&self, account: &Account) -> Box<dyn AccountClient>;
}

/// Run a remote call with an upper bound. Expiry becomes a transient
/// [`SessionError::Timeout`].
pub async fn bounded<T, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout { operation, after }),
    }
}

/// Disconnect `client`, giving up after `after`. A stuck close is logged and
/// abandoned so no lock or sweep waits on it.
pub async fn close(client: &mut dyn AccountClient, after: Duration) {
    if tokio::time::timeout(after, client.disconnect()).await.is_err() {
        tracing::warn!(?after, "Session disconnect timed out");
    }
}

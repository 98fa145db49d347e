//! Error types for the outreach pool.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures surfaced by a remote session.
///
/// Whether a failure is terminal for the account is decided by
/// [`crate::session::classify`], not by the variant alone.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("Remote rejected request: {code}: {message}")]
    Rpc { code: String, message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session is not connected")]
    NotConnected,

    #[error("Account has no session credential")]
    NotAuthorized,

    #[error("Invalid response from session gateway: {0}")]
    InvalidResponse(String),
}

/// Orchestrator errors for operations that report a reason to the caller.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("Account {phone} is already enrolled and active")]
    AlreadyEnrolled { phone: String },

    #[error("Enrollment for {phone} failed: {source}")]
    Enrollment {
        phone: String,
        #[source]
        source: SessionError,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Notifier delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notifier {name} delivery failed: {reason}")]
    DeliveryFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

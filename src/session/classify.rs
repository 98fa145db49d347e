//! Failure classification: terminal ban signals versus everything else.

use std::fmt;

use crate::error::SessionError;

/// A platform signal that the account can never operate again with its
/// current credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalSignal {
    AuthKeyUnregistered,
    SessionRevoked,
    UserDeactivated,
    UserDeactivatedBan,
}

impl TerminalSignal {
    /// Recognize a provider RPC error code.
    pub fn from_rpc_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "AUTH_KEY_UNREGISTERED" => Some(Self::AuthKeyUnregistered),
            "SESSION_REVOKED" => Some(Self::SessionRevoked),
            "USER_DEACTIVATED" => Some(Self::UserDeactivated),
            "USER_DEACTIVATED_BAN" => Some(Self::UserDeactivatedBan),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthKeyUnregistered => "AUTH_KEY_UNREGISTERED",
            Self::SessionRevoked => "SESSION_REVOKED",
            Self::UserDeactivated => "USER_DEACTIVATED",
            Self::UserDeactivatedBan => "USER_DEACTIVATED_BAN",
        }
    }
}

impl fmt::Display for TerminalSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// How the lifecycle reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Block immediately, no retry.
    Terminal(TerminalSignal),
    /// Count towards the disable threshold.
    Transient,
}

/// Classify a session failure.
pub fn classify(error: &SessionError) -> FailureClass {
    match error {
        SessionError::Rpc { code, .. } => match TerminalSignal::from_rpc_code(code) {
            Some(signal) => FailureClass::Terminal(signal),
            None => FailureClass::Transient,
        },
        SessionError::Timeout { .. }
        | SessionError::Transport(_)
        | SessionError::NotConnected
        | SessionError::NotAuthorized
        | SessionError::InvalidResponse(_) => FailureClass::Transient,
    }
}

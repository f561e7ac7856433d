//! # Core Error Types
//!
//! Centralized error definitions for the engage-core crate.
//! All errors implement `std::error::Error` and `std::fmt::Display`.

use crate::types::ActionKind;
use crate::DispatchReport;
use std::fmt;
use thiserror::Error;

/// Unified error type for engage-core operations.
///
/// This enum wraps all specific error types and provides a unified
/// error interface for the application layer.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Config(ConfigError),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Action(ActionError),

    #[error(transparent)]
    Dispatch(DispatchError),
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        CoreError::Config(e)
    }
}

impl From<LedgerError> for CoreError {
    fn from(e: LedgerError) -> Self {
        CoreError::Ledger(e)
    }
}

impl From<ActionError> for CoreError {
    fn from(e: ActionError) -> Self {
        CoreError::Action(e)
    }
}

impl From<DispatchError> for CoreError {
    fn from(e: DispatchError) -> Self {
        CoreError::Dispatch(e)
    }
}

/// Coarse classification of a failed (or skipped) action, as reported in outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotAuthenticated,
    AuthExpired,
    ChallengeUnresolved,
    RateLimited,
    Transient,
    MaxAttemptsExceeded,
    QuotaExceeded,
    LedgerIo,
    NotFound,
    Cancelled,
}

impl ErrorKind {
    /// The identity cannot act again this run without out-of-band re-authentication.
    pub fn is_identity_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::NotAuthenticated | ErrorKind::AuthExpired | ErrorKind::ChallengeUnresolved
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotAuthenticated => "not_authenticated",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::ChallengeUnresolved => "challenge_unresolved",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::MaxAttemptsExceeded => "max_attempts_exceeded",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::LedgerIo => "ledger_io",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a [`RemoteClient`](crate::RemoteClient) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("login required (session expired)")]
    AuthExpired,

    #[error("challenge required")]
    ChallengeRequired,

    #[error("two-factor verification required")]
    TwoFactorRequired,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("{0}")]
    Generic(String),
}

impl RemoteError {
    /// True for the explicit variant and for generic errors carrying a rate-limit signal.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            RemoteError::RateLimited(_) => true,
            RemoteError::Generic(msg) => {
                let msg = msg.to_lowercase();
                ["rate limited", "too many requests", "please wait a few minutes", "429"]
                    .iter()
                    .any(|signal| msg.contains(signal))
            }
            _ => false,
        }
    }
}

/// Terminal failure of an action performed on behalf of one identity.
#[derive(Error, Debug, Clone)]
pub enum ActionError {
    #[error("'{handle}' is not authenticated")]
    NotAuthenticated { handle: String },

    #[error("session expired for '{handle}'")]
    AuthExpired { handle: String },

    #[error("challenge unresolved for '{handle}': {reason}")]
    ChallengeUnresolved { handle: String, reason: String },

    #[error("daily {kind} quota exhausted for '{handle}'")]
    QuotaExceeded { handle: String, kind: ActionKind },

    #[error("{operation} gave up after {attempts} attempts: {last}")]
    MaxAttemptsExceeded {
        operation: String,
        attempts: u32,
        last: RemoteError,
    },

    /// Attempts exhausted with safe mode off; the dispatcher escalates this.
    #[error("{operation} failed after {attempts} attempts (safe mode off): {last}")]
    Fatal {
        operation: String,
        attempts: u32,
        last: RemoteError,
    },

    #[error("{operation}: {reason}")]
    NotFound { operation: String, reason: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("cancelled")]
    Cancelled,
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::NotAuthenticated { .. } => ErrorKind::NotAuthenticated,
            ActionError::AuthExpired { .. } => ErrorKind::AuthExpired,
            ActionError::ChallengeUnresolved { .. } => ErrorKind::ChallengeUnresolved,
            ActionError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            ActionError::MaxAttemptsExceeded { .. } => ErrorKind::MaxAttemptsExceeded,
            ActionError::Fatal { last, .. } if last.is_rate_limited() => ErrorKind::RateLimited,
            ActionError::Fatal { .. } => ErrorKind::Transient,
            ActionError::NotFound { .. } => ErrorKind::NotFound,
            ActionError::Ledger(_) => ErrorKind::LedgerIo,
            ActionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_identity_fatal(&self) -> bool {
        self.kind().is_identity_fatal()
    }

    /// Escalates to the dispatch caller instead of being reported per target.
    pub fn is_dispatch_fatal(&self) -> bool {
        matches!(self, ActionError::Fatal { .. })
    }
}

/// Ledger store errors
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("cannot read ledger store {path}: {msg}")]
    Read { path: String, msg: String },

    #[error("cannot write ledger store {path}: {msg}")]
    Write { path: String, msg: String },
}

/// Configuration-related errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Parse error in {path}: {msg}")]
    ParseError { path: String, msg: String },

    #[error("I/O error on {path}: {msg}")]
    IoError { path: String, msg: String },
}

/// Dispatch-level failures.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A worker exhausted its attempts with safe mode disabled. In-flight work
    /// was drained before returning; `report` holds what completed.
    #[error("dispatch aborted: '{identity}' failed on '{target}': {source}")]
    Fatal {
        identity: String,
        target: String,
        #[source]
        source: ActionError,
        report: Box<DispatchReport>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_signal_detection() {
        assert!(RemoteError::RateLimited("slow down".into()).is_rate_limited());
        assert!(RemoteError::Generic("Please wait a few minutes before you try again".into())
            .is_rate_limited());
        assert!(RemoteError::Generic("HTTP 429 Too Many Requests".into()).is_rate_limited());
        assert!(!RemoteError::Generic("media not found".into()).is_rate_limited());
        assert!(!RemoteError::ChallengeRequired.is_rate_limited());
    }

    #[test]
    fn test_identity_fatal_kinds() {
        let expired = ActionError::AuthExpired {
            handle: "alice".into(),
        };
        assert!(expired.is_identity_fatal());
        assert!(!expired.is_dispatch_fatal());

        let fatal = ActionError::Fatal {
            operation: "user_follow".into(),
            attempts: 3,
            last: RemoteError::Generic("boom".into()),
        };
        assert!(fatal.is_dispatch_fatal());
        assert_eq!(fatal.kind(), ErrorKind::Transient);
        assert!(!ErrorKind::QuotaExceeded.is_identity_fatal());
    }
}

//! Shared value types: action kinds, auth state and per-target outcomes.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A target handle (user name, location name, ...).
pub type Target = String;

/// Category of action, each with its own delay and (for most) its own daily quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Follow,
    Unfollow,
    Like,
    Comment,
    Dm,
    StoryView,
    Scrape,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Follow,
        ActionKind::Unfollow,
        ActionKind::Like,
        ActionKind::Comment,
        ActionKind::Dm,
        ActionKind::StoryView,
        ActionKind::Scrape,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Follow => "follow",
            ActionKind::Unfollow => "unfollow",
            ActionKind::Like => "like",
            ActionKind::Comment => "comment",
            ActionKind::Dm => "dm",
            ActionKind::StoryView => "story_view",
            ActionKind::Scrape => "scrape",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Authenticated,
    Unauthenticated,
    Challenged,
}

impl AuthState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            AuthState::Authenticated => 0,
            AuthState::Unauthenticated => 1,
            AuthState::Challenged => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => AuthState::Authenticated,
            2 => AuthState::Challenged,
            _ => AuthState::Unauthenticated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    SkippedQuota,
    Failed(ErrorKind),
}

impl OutcomeStatus {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            OutcomeStatus::Failed(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Success => f.write_str("Success"),
            OutcomeStatus::SkippedQuota => f.write_str("Skipped"),
            OutcomeStatus::Failed(kind) => write!(f, "Failed ({})", kind),
        }
    }
}

/// Result of one target handled by one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub identity: String,
    pub target: Target,
    pub action_kind: ActionKind,
    pub status: OutcomeStatus,
}

impl TaskOutcome {
    pub fn new(identity: &str, target: &str, action_kind: ActionKind, status: OutcomeStatus) -> Self {
        Self {
            identity: identity.to_string(),
            target: target.to_string(),
            action_kind,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

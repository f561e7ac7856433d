//! One account identity: handle, proxy, auth state and last action time.

use crate::config::ProxyConfig;
use crate::types::AuthState;
use crate::utils::lock_unpoisoned;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Identity {
    handle: String,
    proxy: Option<ProxyConfig>,
    auth: AtomicU8,
    last_action: Mutex<Option<Instant>>,
}

impl Identity {
    pub fn new(handle: impl Into<String>, proxy: Option<ProxyConfig>, state: AuthState) -> Self {
        Self {
            handle: handle.into(),
            proxy,
            auth: AtomicU8::new(state.as_u8()),
            last_action: Mutex::new(None),
        }
    }

    /// An already-logged-in identity without a proxy.
    pub fn authenticated(handle: impl Into<String>) -> Self {
        Self::new(handle, None, AuthState::Authenticated)
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState::from_u8(self.auth.load(Ordering::SeqCst))
    }

    pub fn set_auth_state(&self, state: AuthState) {
        let previous = AuthState::from_u8(self.auth.swap(state.as_u8(), Ordering::SeqCst));
        if previous != state {
            tracing::debug!(identity = %self.handle, "auth state {:?} -> {:?}", previous, state);
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_state() == AuthState::Authenticated
    }

    /// Time of the last successful remote action, on the tokio clock.
    pub fn last_action(&self) -> Option<Instant> {
        *lock_unpoisoned(&self.last_action)
    }

    pub fn mark_action(&self) {
        *lock_unpoisoned(&self.last_action) = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_state_transitions() {
        let identity = Identity::authenticated("alice");
        assert!(identity.is_authenticated());
        identity.set_auth_state(AuthState::Challenged);
        assert_eq!(identity.auth_state(), AuthState::Challenged);
        assert!(!identity.is_authenticated());
    }

    #[tokio::test]
    async fn test_mark_action_records_instant() {
        let identity = Identity::authenticated("alice");
        assert!(identity.last_action().is_none());
        identity.mark_action();
        assert!(identity.last_action().is_some());
    }
}

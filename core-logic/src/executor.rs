//! Safe request execution for one identity.
//!
//! Every remote call made on behalf of an identity goes through
//! [`SafeRequestExecutor::execute`], which enforces minimum spacing between
//! actions, classifies remote errors, resolves challenges, and retries with
//! fixed cooldown/backoff up to `max_attempts`.

use crate::config::EngineConfig;
use crate::delay::sleep_or_cancel;
use crate::error::{ActionError, RemoteError};
use crate::identity::Identity;
use crate::remote::RemoteClient;
use crate::types::AuthState;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Challenge resolutions allowed within one `execute` call.
const MAX_CHALLENGE_ROUNDS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub safe_mode: bool,
    pub min_spacing: Duration,
    pub rate_limit_cooldown: Duration,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            safe_mode: config.safe_mode,
            min_spacing: config.min_spacing(),
            rate_limit_cooldown: config.rate_limit_cooldown(),
            backoff: config.retry_backoff(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    pub fn with_min_spacing(mut self, min_spacing: Duration) -> Self {
        self.min_spacing = min_spacing;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }
}

pub struct SafeRequestExecutor {
    identity: Arc<Identity>,
    client: Arc<dyn RemoteClient>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for SafeRequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeRequestExecutor")
            .field("identity", &self.identity.handle())
            .field("policy", &self.policy)
            .finish()
    }
}

impl SafeRequestExecutor {
    pub fn new(identity: Arc<Identity>, client: Arc<dyn RemoteClient>, policy: RetryPolicy) -> Self {
        Self {
            identity,
            client,
            policy,
        }
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds or a terminal condition is reached.
    ///
    /// `call` is invoked once per attempt. Returns `NotAuthenticated` without
    /// calling it when the identity is not authenticated.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, ActionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let handle = self.identity.handle();
        if !self.identity.is_authenticated() {
            debug!(identity = %handle, "{} skipped: identity not authenticated", operation);
            return Err(ActionError::NotAuthenticated {
                handle: handle.to_string(),
            });
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0u32;
        let mut challenge_rounds = 0u32;

        loop {
            if !self.wait_for_spacing(cancel).await {
                return Err(ActionError::Cancelled);
            }

            debug!(
                identity = %handle,
                "{} attempt {}/{}",
                operation,
                attempts + 1,
                max_attempts
            );

            let err = match call().await {
                Ok(value) => {
                    self.identity.mark_action();
                    if attempts > 0 {
                        info!(identity = %handle, "{} succeeded after {} failed attempts", operation, attempts);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match err {
                RemoteError::AuthExpired => {
                    self.identity.set_auth_state(AuthState::Unauthenticated);
                    error!(identity = %handle, "{} aborted: session expired, re-login required", operation);
                    return Err(ActionError::AuthExpired {
                        handle: handle.to_string(),
                    });
                }
                RemoteError::TwoFactorRequired => {
                    self.identity.set_auth_state(AuthState::Challenged);
                    error!(identity = %handle, "{} aborted: two-factor verification required", operation);
                    return Err(ActionError::ChallengeUnresolved {
                        handle: handle.to_string(),
                        reason: err.to_string(),
                    });
                }
                RemoteError::ChallengeRequired => {
                    challenge_rounds += 1;
                    if challenge_rounds > MAX_CHALLENGE_ROUNDS {
                        self.identity.set_auth_state(AuthState::Challenged);
                        error!(identity = %handle, "{} aborted: challenge keeps coming back", operation);
                        return Err(ActionError::ChallengeUnresolved {
                            handle: handle.to_string(),
                            reason: format!("challenge repeated {} times", challenge_rounds),
                        });
                    }
                    warn!(identity = %handle, "{}: challenge required, attempting resolution", operation);
                    if let Err(e) = self.client.resolve_challenge().await {
                        self.identity.set_auth_state(AuthState::Challenged);
                        error!(identity = %handle, "{} aborted: challenge resolution failed: {}", operation, e);
                        return Err(ActionError::ChallengeUnresolved {
                            handle: handle.to_string(),
                            reason: e.to_string(),
                        });
                    }
                    info!(identity = %handle, "{}: challenge resolved, retrying", operation);
                }
                err => {
                    attempts += 1;
                    let rate_limited = err.is_rate_limited();

                    if rate_limited {
                        warn!(
                            identity = %handle,
                            "{} rate limited (attempt {}/{}), cooling down {:?}: {}",
                            operation,
                            attempts,
                            max_attempts,
                            self.policy.rate_limit_cooldown,
                            err
                        );
                        if !sleep_or_cancel(self.policy.rate_limit_cooldown, cancel).await {
                            return Err(ActionError::Cancelled);
                        }
                    }

                    if attempts >= max_attempts {
                        return Err(self.exhausted(operation, attempts, err));
                    }

                    if !rate_limited {
                        warn!(
                            identity = %handle,
                            "{} failed (attempt {}/{}). Retrying in {:?}: {}",
                            operation,
                            attempts,
                            max_attempts,
                            self.policy.backoff,
                            err
                        );
                        if !sleep_or_cancel(self.policy.backoff, cancel).await {
                            return Err(ActionError::Cancelled);
                        }
                    }
                }
            }
        }
    }

    /// Sleep out the remainder of the minimum spacing since the last action.
    async fn wait_for_spacing(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let Some(last) = self.identity.last_action() else {
            return true;
        };
        let remaining = self.policy.min_spacing.saturating_sub(last.elapsed());
        sleep_or_cancel(remaining, cancel).await
    }

    fn exhausted(&self, operation: &str, attempts: u32, last: RemoteError) -> ActionError {
        let handle = self.identity.handle();
        if self.policy.safe_mode {
            error!(identity = %handle, "{} failed after {} attempts: {}", operation, attempts, last);
            ActionError::MaxAttemptsExceeded {
                operation: operation.to_string(),
                attempts,
                last,
            }
        } else {
            error!(
                identity = %handle,
                "{} failed after {} attempts with safe mode off: {}",
                operation,
                attempts,
                last
            );
            ActionError::Fatal {
                operation: operation.to_string(),
                attempts,
                last,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRemote;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(client: Arc<MockRemote>, policy: RetryPolicy) -> SafeRequestExecutor {
        SafeRequestExecutor::new(Arc::new(Identity::authenticated("alice")), client, policy)
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_auth_expired() {
        let exec = executor(Arc::new(MockRemote::new()), RetryPolicy::default());
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = exec
            .execute("user_follow", &CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::AuthExpired) }
            })
            .await;
        assert!(matches!(result, Err(ActionError::AuthExpired { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.identity().auth_state(), AuthState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_makes_no_call() {
        let identity = Arc::new(Identity::new("bob", None, AuthState::Challenged));
        let exec = SafeRequestExecutor::new(identity, Arc::new(MockRemote::new()), RetryPolicy::default());
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = exec
            .execute("media_like", &CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(ActionError::NotAuthenticated { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_challenge_does_not_consume_attempt() {
        let exec = executor(
            Arc::new(MockRemote::new()),
            RetryPolicy::default().with_max_attempts(1),
        );
        let calls = AtomicU32::new(0);
        let result = exec
            .execute("user_follow", &CancellationToken::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(RemoteError::ChallengeRequired)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let exec = executor(Arc::new(MockRemote::new()), RetryPolicy::default());
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = exec
            .execute("user_follow", &token, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Generic("connection reset".into())) }
            })
            .await;
        assert!(matches!(result, Err(ActionError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

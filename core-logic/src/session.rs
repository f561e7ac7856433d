//! # Identity Sessions
//!
//! An [`IdentitySession`] bundles everything that acts on behalf of one
//! account: the identity itself, its remote client, its quota tracker, its
//! safe-request executor, its delay policy and its worker slots.
//!
//! The single-target verbs here reserve quota before touching the remote,
//! so a `QuotaExceeded` error always means no remote call was made.

use crate::accounts::{Account, SessionStore};
use crate::campaign::{personalize, pick_comment, pick_reaction, Campaign};
use crate::config::EngineConfig;
use crate::delay::DelayPolicy;
use crate::error::{ActionError, RemoteError};
use crate::executor::{RetryPolicy, SafeRequestExecutor};
use crate::identity::Identity;
use crate::quota::{Clock, QuotaReservation, QuotaTracker};
use crate::remote::{Media, RemoteClient};
use crate::types::{ActionKind, AuthState};
use crate::utils::lock_unpoisoned;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a story interaction did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoryTally {
    pub viewed: usize,
    pub liked: usize,
    pub reacted: usize,
}

pub struct IdentitySession {
    identity: Arc<Identity>,
    client: Arc<dyn RemoteClient>,
    quota: Arc<QuotaTracker>,
    executor: SafeRequestExecutor,
    delays: Arc<DelayPolicy>,
    slots: Arc<Semaphore>,
    config: Arc<EngineConfig>,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for IdentitySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySession")
            .field("handle", &self.identity.handle())
            .field("auth_state", &self.identity.auth_state())
            .field("slots", &self.slots.available_permits())
            .finish()
    }
}

impl IdentitySession {
    pub fn new(
        identity: Arc<Identity>,
        client: Arc<dyn RemoteClient>,
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let quota = Arc::new(QuotaTracker::new(identity.handle(), config.limits(), clock));
        let executor = SafeRequestExecutor::new(
            identity.clone(),
            client.clone(),
            RetryPolicy::from_config(&config),
        );
        Self {
            identity,
            client,
            quota,
            executor,
            delays: Arc::new(DelayPolicy::new(&config)),
            slots: Arc::new(Semaphore::new(config.max_threads.max(1))),
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seed both the delay policy and the comment/reaction picks.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.delays = Arc::new(DelayPolicy::with_seed(&self.config, seed));
        self.rng = Mutex::new(StdRng::seed_from_u64(seed.wrapping_add(1)));
        self
    }

    pub fn with_delay_policy(mut self, delays: DelayPolicy) -> Self {
        self.delays = Arc::new(delays);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = SafeRequestExecutor::new(self.identity.clone(), self.client.clone(), policy);
        self
    }

    /// Log an account in and build its session.
    ///
    /// A saved session blob is offered to the client first and the refreshed
    /// blob is saved after success. Login failures do not error: the
    /// identity comes back unauthenticated (or challenged) and the
    /// dispatcher leaves it out.
    pub async fn connect(
        account: &Account,
        client: Arc<dyn RemoteClient>,
        store: &SessionStore,
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let handle = account.username.as_str();
        if config.debug {
            debug!(identity = %handle, "Attempting login");
        }

        let saved = match store.load(handle) {
            Ok(saved) => saved,
            Err(e) => {
                warn!(identity = %handle, "Session load failed: {:#}", e);
                None
            }
        };

        let state = match client.login(handle, &account.credentials, saved.clone()).await {
            Ok(blob) => Self::after_login(handle, store, &blob),
            Err(RemoteError::ChallengeRequired) => {
                warn!(identity = %handle, "Challenge required at login");
                match client.resolve_challenge().await {
                    Ok(()) => match client.login(handle, &account.credentials, saved).await {
                        Ok(blob) => Self::after_login(handle, store, &blob),
                        Err(e) => {
                            error!(identity = %handle, "Login failed after challenge: {}", e);
                            AuthState::Challenged
                        }
                    },
                    Err(e) => {
                        error!(identity = %handle, "Challenge unresolved: {}", e);
                        AuthState::Challenged
                    }
                }
            }
            Err(RemoteError::TwoFactorRequired) => {
                error!(identity = %handle, "2FA required, cannot log in unattended");
                AuthState::Challenged
            }
            Err(e) => {
                error!(identity = %handle, "Login failed: {}", e);
                AuthState::Unauthenticated
            }
        };

        let identity = Arc::new(Identity::new(handle, account.proxy.clone(), state));
        Self::new(identity, client, config, clock)
    }

    fn after_login(handle: &str, store: &SessionStore, blob: &serde_json::Value) -> AuthState {
        info!(identity = %handle, "Login success");
        if let Err(e) = store.save(handle, blob) {
            warn!(identity = %handle, "Could not save session: {:#}", e);
        }
        AuthState::Authenticated
    }

    pub fn handle(&self) -> &str {
        self.identity.handle()
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_authenticated()
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    pub fn delays(&self) -> &DelayPolicy {
        &self.delays
    }

    /// Long-lived worker slots shared by every dispatch on this session.
    pub fn slots(&self) -> &Arc<Semaphore> {
        &self.slots
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub(crate) fn client(&self) -> &Arc<dyn RemoteClient> {
        &self.client
    }

    /// Run one remote call through this identity's executor.
    pub(crate) async fn call<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, ActionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.executor.execute(operation, cancel, call).await
    }

    pub(crate) fn reserve(&self, kind: ActionKind) -> Result<QuotaReservation, ActionError> {
        self.quota
            .try_reserve(kind)
            .ok_or_else(|| ActionError::QuotaExceeded {
                handle: self.handle().to_string(),
                kind,
            })
    }

    pub(crate) fn random_comment(&self, pool: &[String]) -> String {
        pick_comment(pool, &mut *lock_unpoisoned(&self.rng))
    }

    pub(crate) fn random_reaction(&self) -> &'static str {
        pick_reaction(&mut *lock_unpoisoned(&self.rng))
    }

    pub(crate) fn shuffle<T>(&self, items: &mut [T]) {
        items.shuffle(&mut *lock_unpoisoned(&self.rng));
    }

    pub(crate) async fn user_id(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ActionError> {
        let client = &self.client;
        self.call("resolve_user_id", cancel, move || client.resolve_user_id(username))
            .await
    }

    pub(crate) async fn recent_medias(
        &self,
        user_id: &str,
        amount: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Media>, ActionError> {
        let client = &self.client;
        self.call("user_medias", cancel, move || client.user_medias(user_id, amount))
            .await
    }

    async fn latest_media(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<Media, ActionError> {
        let user_id = self.user_id(target, cancel).await?;
        self.recent_medias(&user_id, 1, cancel)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ActionError::NotFound {
                operation: "user_medias".to_string(),
                reason: format!("'{}' has no posts", target),
            })
    }

    /// How many more accounts this identity may follow before hitting
    /// `max_following_limit`.
    pub async fn following_headroom(&self, cancel: &CancellationToken) -> Result<u64, ActionError> {
        let client = &self.client;
        let me = self.call("self_info", cancel, move || client.self_info()).await?;
        Ok(self
            .config
            .max_following_limit
            .saturating_sub(me.following_count))
    }

    pub async fn follow(&self, target: &str, cancel: &CancellationToken) -> Result<(), ActionError> {
        let reservation = self.reserve(ActionKind::Follow)?;
        let user_id = self.user_id(target, cancel).await?;
        let client = &self.client;
        let id = user_id.as_str();
        self.call("user_follow", cancel, move || client.user_follow(id))
            .await?;
        reservation.commit();
        info!(identity = %self.handle(), "Followed {}", target);
        Ok(())
    }

    pub async fn unfollow(&self, target: &str, cancel: &CancellationToken) -> Result<(), ActionError> {
        let reservation = self.reserve(ActionKind::Unfollow)?;
        let user_id = self.user_id(target, cancel).await?;
        let client = &self.client;
        let id = user_id.as_str();
        self.call("user_unfollow", cancel, move || client.user_unfollow(id))
            .await?;
        reservation.commit();
        info!(identity = %self.handle(), "Unfollowed {}", target);
        Ok(())
    }

    /// Like the target's most recent post.
    pub async fn like_latest(&self, target: &str, cancel: &CancellationToken) -> Result<(), ActionError> {
        let reservation = self.reserve(ActionKind::Like)?;
        let media = self.latest_media(target, cancel).await?;
        let client = &self.client;
        let media_id = media.id.as_str();
        self.call("media_like", cancel, move || client.media_like(media_id))
            .await?;
        reservation.commit();
        info!(identity = %self.handle(), "Liked post {} of {}", media.id, target);
        Ok(())
    }

    /// Comment on the target's most recent post with a random line from `comments`.
    pub async fn comment_latest(
        &self,
        target: &str,
        comments: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let reservation = self.reserve(ActionKind::Comment)?;
        let media = self.latest_media(target, cancel).await?;
        let text = self.random_comment(comments);
        let client = &self.client;
        let (media_id, body) = (media.id.as_str(), text.as_str());
        self.call("media_comment", cancel, move || client.media_comment(media_id, body))
            .await?;
        reservation.commit();
        info!(identity = %self.handle(), "Commented on post {} of {}", media.id, target);
        Ok(())
    }

    /// Send a direct message with `{name}` filled in from the target's profile.
    pub async fn send_dm(
        &self,
        target: &str,
        template: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let reservation = self.reserve(ActionKind::Dm)?;
        let user_id = self.user_id(target, cancel).await?;
        let client = &self.client;
        let id = user_id.as_str();
        let info = self.call("user_info", cancel, move || client.user_info(id)).await?;
        let message = personalize(template, &info.full_name, target);
        let text = message.as_str();
        self.call("direct_send", cancel, move || client.direct_send(id, text))
            .await?;
        reservation.commit();
        info!(identity = %self.handle(), "DM sent to {}", target);
        Ok(())
    }

    /// Mark all of the target's stories seen, optionally liking and reacting
    /// to each. Likes and reactions draw on the like and comment quotas and
    /// are skipped once those run out.
    pub async fn view_stories(
        &self,
        target: &str,
        like: bool,
        react: bool,
        cancel: &CancellationToken,
    ) -> Result<StoryTally, ActionError> {
        let user_id = self.user_id(target, cancel).await?;
        let client = &self.client;
        let id = user_id.as_str();
        let stories = self.call("user_stories", cancel, move || client.user_stories(id)).await?;
        let mut tally = StoryTally::default();
        if stories.is_empty() {
            debug!(identity = %self.handle(), "{} has no active stories", target);
            return Ok(tally);
        }

        let ids: Vec<String> = stories.iter().map(|s| s.id.clone()).collect();
        let seen = ids.as_slice();
        self.call("story_seen", cancel, move || client.story_seen(seen)).await?;
        tally.viewed = ids.len();

        for story_id in &ids {
            let story_id = story_id.as_str();
            if like {
                if let Some(reservation) = self.quota.try_reserve(ActionKind::Like) {
                    match self.call("story_like", cancel, move || client.story_like(story_id)).await {
                        Ok(()) => {
                            reservation.commit();
                            tally.liked += 1;
                        }
                        Err(e) if e.is_identity_fatal() || e.is_dispatch_fatal() => return Err(e),
                        Err(e) => warn!(identity = %self.handle(), "Story like failed: {}", e),
                    }
                }
            }
            if react {
                if let Some(reservation) = self.quota.try_reserve(ActionKind::Comment) {
                    let emoji = self.random_reaction();
                    match self
                        .call("story_react", cancel, move || client.story_react(story_id, emoji))
                        .await
                    {
                        Ok(()) => {
                            reservation.commit();
                            tally.reacted += 1;
                        }
                        Err(e) if e.is_identity_fatal() || e.is_dispatch_fatal() => return Err(e),
                        Err(e) => warn!(identity = %self.handle(), "Story reaction failed: {}", e),
                    }
                }
            }
        }

        info!(
            identity = %self.handle(),
            "Stories of {}: {} viewed, {} liked, {} reacted",
            target,
            tally.viewed,
            tally.liked,
            tally.reacted
        );
        Ok(tally)
    }

    /// Run one campaign action against one target.
    pub async fn perform(
        &self,
        campaign: &Campaign,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        match campaign {
            Campaign::Follow => self.follow(target, cancel).await,
            Campaign::Unfollow => self.unfollow(target, cancel).await,
            Campaign::Like => self.like_latest(target, cancel).await,
            Campaign::Comment { comments } => self.comment_latest(target, comments, cancel).await,
            Campaign::DirectMessage { template } => self.send_dm(target, template, cancel).await,
            Campaign::StoryView { like, react } => self
                .view_stories(target, *like, *react, cancel)
                .await
                .map(|_| ()),
        }
    }
}

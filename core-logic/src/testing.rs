//! Scriptable in-memory [`RemoteClient`] for tests.
//!
//! Every username resolves to `id_<username>` and owns one post unless
//! configured otherwise. Failures are scripted per operation name (the
//! trait method name, e.g. `"user_follow"`).

use crate::accounts::Credentials;
use crate::error::RemoteError;
use crate::remote::{Comment, Highlight, Location, Media, RemoteClient, RemoteResult, Story, UserInfo};
use crate::utils::lock_unpoisoned;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const ID_PREFIX: &str = "id_";

#[derive(Debug, Default)]
struct MockState {
    calls: HashMap<String, usize>,
    fail_next: HashMap<String, VecDeque<RemoteError>>,
    fail_always: HashMap<String, RemoteError>,
    login_error: Option<RemoteError>,
    challenge_error: Option<RemoteError>,
    following_count: u64,
    users: HashMap<String, UserInfo>,
    medias: HashMap<String, Vec<Media>>,
    stories: HashMap<String, Vec<Story>>,
    highlights: HashMap<String, Vec<Highlight>>,
    tagged: HashMap<String, Vec<Media>>,
    likers: HashMap<String, Vec<String>>,
    comments: HashMap<String, Vec<Comment>>,
    locations: Vec<(Location, Vec<Media>)>,
    followed: Vec<String>,
    unfollowed: Vec<String>,
    liked: Vec<String>,
    commented: Vec<(String, String)>,
    sent: Vec<(String, String)>,
    stories_seen: Vec<String>,
    reactions: Vec<(String, String)>,
    logins: Vec<Option<serde_json::Value>>,
}

#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long on the tokio clock.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_following_count(self, count: u64) -> Self {
        lock_unpoisoned(&self.state).following_count = count;
        self
    }

    pub fn with_user(self, info: UserInfo) -> Self {
        lock_unpoisoned(&self.state)
            .users
            .insert(info.username.clone(), info);
        self
    }

    pub fn with_medias(self, username: &str, medias: Vec<Media>) -> Self {
        lock_unpoisoned(&self.state)
            .medias
            .insert(username.to_string(), medias);
        self
    }

    pub fn with_stories(self, username: &str, stories: Vec<Story>) -> Self {
        lock_unpoisoned(&self.state)
            .stories
            .insert(username.to_string(), stories);
        self
    }

    pub fn with_highlights(self, username: &str, highlights: Vec<Highlight>) -> Self {
        lock_unpoisoned(&self.state)
            .highlights
            .insert(username.to_string(), highlights);
        self
    }

    pub fn with_tagged(self, username: &str, medias: Vec<Media>) -> Self {
        lock_unpoisoned(&self.state)
            .tagged
            .insert(username.to_string(), medias);
        self
    }

    pub fn with_likers(self, media_id: &str, likers: &[&str]) -> Self {
        lock_unpoisoned(&self.state).likers.insert(
            media_id.to_string(),
            likers.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn with_comments(self, media_id: &str, commenters: &[&str]) -> Self {
        let comments = commenters
            .iter()
            .enumerate()
            .map(|(i, user)| Comment {
                id: format!("{}_c{}", media_id, i),
                username: user.to_string(),
                text: "nice".to_string(),
            })
            .collect();
        lock_unpoisoned(&self.state)
            .comments
            .insert(media_id.to_string(), comments);
        self
    }

    pub fn with_location(self, location: Location, medias: Vec<Media>) -> Self {
        lock_unpoisoned(&self.state).locations.push((location, medias));
        self
    }

    pub fn with_login_error(self, error: RemoteError) -> Self {
        lock_unpoisoned(&self.state).login_error = Some(error);
        self
    }

    /// Make `resolve_challenge` fail with `error`.
    pub fn with_unresolvable_challenge(self, error: RemoteError) -> Self {
        lock_unpoisoned(&self.state).challenge_error = Some(error);
        self
    }

    /// The next calls to `op` fail with these errors, in order.
    pub fn fail_next(&self, op: &str, errors: Vec<RemoteError>) {
        lock_unpoisoned(&self.state)
            .fail_next
            .entry(op.to_string())
            .or_default()
            .extend(errors);
    }

    /// Every call to `op` fails with `error` (after any `fail_next` queue).
    pub fn fail_always(&self, op: &str, error: RemoteError) {
        lock_unpoisoned(&self.state)
            .fail_always
            .insert(op.to_string(), error);
    }

    pub fn calls(&self, op: &str) -> usize {
        lock_unpoisoned(&self.state)
            .calls
            .get(op)
            .copied()
            .unwrap_or_default()
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn followed(&self) -> Vec<String> {
        lock_unpoisoned(&self.state).followed.clone()
    }

    pub fn unfollowed(&self) -> Vec<String> {
        lock_unpoisoned(&self.state).unfollowed.clone()
    }

    pub fn liked(&self) -> Vec<String> {
        lock_unpoisoned(&self.state).liked.clone()
    }

    /// `(media_id, text)` pairs.
    pub fn commented(&self) -> Vec<(String, String)> {
        lock_unpoisoned(&self.state).commented.clone()
    }

    /// `(user_id, text)` pairs.
    pub fn sent(&self) -> Vec<(String, String)> {
        lock_unpoisoned(&self.state).sent.clone()
    }

    pub fn stories_seen(&self) -> Vec<String> {
        lock_unpoisoned(&self.state).stories_seen.clone()
    }

    /// `(story_id, emoji)` pairs.
    pub fn reactions(&self) -> Vec<(String, String)> {
        lock_unpoisoned(&self.state).reactions.clone()
    }

    /// Session blobs offered to `login`, in call order.
    pub fn logins(&self) -> Vec<Option<serde_json::Value>> {
        lock_unpoisoned(&self.state).logins.clone()
    }

    /// A post fixture; `day` orders posts by `taken_at`.
    pub fn media(id: &str, owner: &str, like_count: u64, day: u32) -> Media {
        Media {
            id: id.to_string(),
            code: format!("code_{}", id),
            owner_username: owner.to_string(),
            like_count,
            comment_count: 0,
            taken_at: fixture_time(day),
        }
    }

    pub fn highlight(id: &str, day: u32) -> Highlight {
        Highlight {
            id: id.to_string(),
            title: format!("highlight {}", id),
            created_at: fixture_time(day),
        }
    }

    pub fn story(id: &str) -> Story {
        Story {
            id: id.to_string(),
            taken_at: fixture_time(1),
        }
    }

    pub fn user_id_of(username: &str) -> String {
        format!("{}{}", ID_PREFIX, username)
    }

    async fn enter(&self, op: &str) -> RemoteResult<()> {
        *lock_unpoisoned(&self.state)
            .calls
            .entry(op.to_string())
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = lock_unpoisoned(&self.state);
        if let Some(err) = state.fail_next.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        match state.fail_always.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn username_of(user_id: &str) -> &str {
        user_id.strip_prefix(ID_PREFIX).unwrap_or(user_id)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        f(&mut lock_unpoisoned(&self.state))
    }
}

fn fixture_time(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
        + chrono::Duration::days(i64::from(day))
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn login(
        &self,
        handle: &str,
        _credentials: &Credentials,
        session: Option<serde_json::Value>,
    ) -> RemoteResult<serde_json::Value> {
        self.enter("login").await?;
        self.with_state(|s| {
            s.logins.push(session.clone());
            match s.login_error.take() {
                Some(err) => Err(err),
                None => Ok(serde_json::json!({ "user": handle, "cookies": { "sessionid": format!("sess_{}", handle) } })),
            }
        })
    }

    async fn resolve_challenge(&self) -> RemoteResult<()> {
        self.enter("resolve_challenge").await?;
        self.with_state(|s| match &s.challenge_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        })
    }

    async fn self_info(&self) -> RemoteResult<UserInfo> {
        self.enter("self_info").await?;
        Ok(UserInfo {
            user_id: Self::user_id_of("me"),
            username: "me".to_string(),
            following_count: self.with_state(|s| s.following_count),
            ..Default::default()
        })
    }

    async fn resolve_user_id(&self, username: &str) -> RemoteResult<String> {
        self.enter("resolve_user_id").await?;
        Ok(Self::user_id_of(username))
    }

    async fn user_info(&self, user_id: &str) -> RemoteResult<UserInfo> {
        self.enter("user_info").await?;
        let username = Self::username_of(user_id);
        Ok(self.with_state(|s| {
            s.users.get(username).cloned().unwrap_or_else(|| UserInfo {
                user_id: user_id.to_string(),
                username: username.to_string(),
                ..Default::default()
            })
        }))
    }

    async fn user_medias(&self, user_id: &str, amount: u32) -> RemoteResult<Vec<Media>> {
        self.enter("user_medias").await?;
        let username = Self::username_of(user_id);
        let mut medias = self.with_state(|s| {
            s.medias
                .get(username)
                .cloned()
                .unwrap_or_else(|| vec![Self::media(&format!("media_{}", username), username, 10, 1)])
        });
        medias.truncate(amount as usize);
        Ok(medias)
    }

    async fn media_like(&self, media_id: &str) -> RemoteResult<()> {
        self.enter("media_like").await?;
        self.with_state(|s| s.liked.push(media_id.to_string()));
        Ok(())
    }

    async fn media_comment(&self, media_id: &str, text: &str) -> RemoteResult<()> {
        self.enter("media_comment").await?;
        self.with_state(|s| s.commented.push((media_id.to_string(), text.to_string())));
        Ok(())
    }

    async fn user_follow(&self, user_id: &str) -> RemoteResult<()> {
        self.enter("user_follow").await?;
        self.with_state(|s| {
            s.followed.push(Self::username_of(user_id).to_string());
            s.following_count += 1;
        });
        Ok(())
    }

    async fn user_unfollow(&self, user_id: &str) -> RemoteResult<()> {
        self.enter("user_unfollow").await?;
        self.with_state(|s| {
            s.unfollowed.push(Self::username_of(user_id).to_string());
            s.following_count = s.following_count.saturating_sub(1);
        });
        Ok(())
    }

    async fn direct_send(&self, user_id: &str, text: &str) -> RemoteResult<()> {
        self.enter("direct_send").await?;
        self.with_state(|s| s.sent.push((user_id.to_string(), text.to_string())));
        Ok(())
    }

    async fn user_stories(&self, user_id: &str) -> RemoteResult<Vec<Story>> {
        self.enter("user_stories").await?;
        let username = Self::username_of(user_id);
        Ok(self.with_state(|s| s.stories.get(username).cloned().unwrap_or_default()))
    }

    async fn story_seen(&self, story_ids: &[String]) -> RemoteResult<()> {
        self.enter("story_seen").await?;
        self.with_state(|s| s.stories_seen.extend(story_ids.iter().cloned()));
        Ok(())
    }

    async fn story_like(&self, story_id: &str) -> RemoteResult<()> {
        self.enter("story_like").await?;
        self.with_state(|s| s.liked.push(story_id.to_string()));
        Ok(())
    }

    async fn story_react(&self, story_id: &str, emoji: &str) -> RemoteResult<()> {
        self.enter("story_react").await?;
        self.with_state(|s| s.reactions.push((story_id.to_string(), emoji.to_string())));
        Ok(())
    }

    async fn user_highlights(&self, user_id: &str) -> RemoteResult<Vec<Highlight>> {
        self.enter("user_highlights").await?;
        let username = Self::username_of(user_id);
        Ok(self.with_state(|s| s.highlights.get(username).cloned().unwrap_or_default()))
    }

    async fn highlight_seen(&self, highlight_id: &str) -> RemoteResult<()> {
        self.enter("highlight_seen").await?;
        self.with_state(|s| s.stories_seen.push(highlight_id.to_string()));
        Ok(())
    }

    async fn location_search(&self, name: &str) -> RemoteResult<Vec<Location>> {
        self.enter("location_search").await?;
        let needle = name.to_lowercase();
        Ok(self.with_state(|s| {
            s.locations
                .iter()
                .filter(|(loc, _)| loc.name.to_lowercase().contains(&needle))
                .map(|(loc, _)| loc.clone())
                .collect()
        }))
    }

    async fn location_medias(&self, location_id: &str, amount: u32) -> RemoteResult<Vec<Media>> {
        self.enter("location_medias").await?;
        let mut medias = self.with_state(|s| {
            s.locations
                .iter()
                .find(|(loc, _)| loc.id == location_id)
                .map(|(_, medias)| medias.clone())
                .unwrap_or_default()
        });
        medias.truncate(amount as usize);
        Ok(medias)
    }

    async fn media_likers(&self, media_id: &str) -> RemoteResult<Vec<String>> {
        self.enter("media_likers").await?;
        Ok(self.with_state(|s| s.likers.get(media_id).cloned().unwrap_or_default()))
    }

    async fn media_comments(&self, media_id: &str, amount: u32) -> RemoteResult<Vec<Comment>> {
        self.enter("media_comments").await?;
        let mut comments = self.with_state(|s| s.comments.get(media_id).cloned().unwrap_or_default());
        comments.truncate(amount as usize);
        Ok(comments)
    }

    async fn usertag_medias(&self, user_id: &str, amount: u32) -> RemoteResult<Vec<Media>> {
        self.enter("usertag_medias").await?;
        let username = Self::username_of(user_id);
        let mut medias = self.with_state(|s| s.tagged.get(username).cloned().unwrap_or_default());
        medias.truncate(amount as usize);
        Ok(medias)
    }
}

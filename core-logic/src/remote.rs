//! Remote platform capability.
//!
//! The engine never speaks the platform's wire protocol itself; every remote
//! call goes through [`RemoteClient`]. Implementations map their transport
//! errors onto [`RemoteError`] so the executor can classify them.

use crate::accounts::Credentials;
use crate::error::RemoteError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    pub username: String,
    pub full_name: String,
    pub biography: String,
    pub follower_count: u64,
    pub following_count: u64,
    pub media_count: u64,
    pub is_private: bool,
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: String,
    pub code: String,
    pub owner_username: String,
    pub like_count: u64,
    pub comment_count: u64,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub username: String,
    pub text: String,
}

/// One authenticated connection to the remote platform.
///
/// Session blobs are opaque JSON owned by the implementation.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn login(
        &self,
        handle: &str,
        credentials: &Credentials,
        session: Option<serde_json::Value>,
    ) -> RemoteResult<serde_json::Value>;

    /// Attempt to clear a pending verification challenge.
    async fn resolve_challenge(&self) -> RemoteResult<()>;

    async fn self_info(&self) -> RemoteResult<UserInfo>;

    async fn resolve_user_id(&self, username: &str) -> RemoteResult<String>;
    async fn user_info(&self, user_id: &str) -> RemoteResult<UserInfo>;
    async fn user_medias(&self, user_id: &str, amount: u32) -> RemoteResult<Vec<Media>>;

    async fn media_like(&self, media_id: &str) -> RemoteResult<()>;
    async fn media_comment(&self, media_id: &str, text: &str) -> RemoteResult<()>;

    async fn user_follow(&self, user_id: &str) -> RemoteResult<()>;
    async fn user_unfollow(&self, user_id: &str) -> RemoteResult<()>;
    async fn direct_send(&self, user_id: &str, text: &str) -> RemoteResult<()>;

    async fn user_stories(&self, user_id: &str) -> RemoteResult<Vec<Story>>;
    async fn story_seen(&self, story_ids: &[String]) -> RemoteResult<()>;
    async fn story_like(&self, story_id: &str) -> RemoteResult<()>;
    async fn story_react(&self, story_id: &str, emoji: &str) -> RemoteResult<()>;

    async fn user_highlights(&self, user_id: &str) -> RemoteResult<Vec<Highlight>>;
    async fn highlight_seen(&self, highlight_id: &str) -> RemoteResult<()>;

    async fn location_search(&self, name: &str) -> RemoteResult<Vec<Location>>;
    async fn location_medias(&self, location_id: &str, amount: u32) -> RemoteResult<Vec<Media>>;

    /// Usernames of accounts that liked the media.
    async fn media_likers(&self, media_id: &str) -> RemoteResult<Vec<String>>;
    async fn media_comments(&self, media_id: &str, amount: u32) -> RemoteResult<Vec<Comment>>;
    async fn usertag_medias(&self, user_id: &str, amount: u32) -> RemoteResult<Vec<Media>>;
}

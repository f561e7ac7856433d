//! Read-only scraping verbs.
//!
//! Scrapes are unmetered but still go through the executor, so they are
//! spaced, retried and classified like any other remote call. Handle lists
//! can be fed straight into [`crate::ledger::write_targets`].

use crate::delay::sleep_or_cancel;
use crate::error::ActionError;
use crate::remote::{Media, UserInfo};
use crate::session::IdentitySession;
use crate::types::{ActionKind, Target};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Posts analysed by an engagement summary.
const SUMMARY_POSTS: u32 = 12;

/// Tagged posts fetched per user.
const TAGGED_POSTS: u32 = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementSummary {
    pub username: String,
    pub followers: u64,
    pub following: u64,
    pub posts_analyzed: usize,
    pub avg_likes: f64,
    /// Average likes as a percentage of followers
    pub engagement_rate: f64,
    pub most_recent: Option<Media>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudienceScrape {
    pub target: String,
    pub likers: BTreeSet<String>,
    pub commenters: BTreeSet<String>,
}

impl AudienceScrape {
    /// Likers and commenters together, sorted and unique.
    pub fn all_users(&self) -> Vec<Target> {
        self.likers.union(&self.commenters).cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationScrape {
    pub location_name: String,
    pub location_id: String,
    pub posts: Vec<Media>,
    /// Post owners, unique, in first-seen order
    pub owners: Vec<Target>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedScrape {
    pub username: String,
    pub user_id: String,
    pub posts: Vec<Media>,
}

impl IdentitySession {
    pub async fn scrape_profile(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<UserInfo, ActionError> {
        let user_id = self.user_id(target, cancel).await?;
        let client = self.client();
        let id = user_id.as_str();
        self.call("user_info", cancel, move || client.user_info(id)).await
    }

    pub async fn engagement_summary(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<EngagementSummary, ActionError> {
        let user_id = self.user_id(target, cancel).await?;
        let client = self.client();
        let id = user_id.as_str();
        let info = self.call("user_info", cancel, move || client.user_info(id)).await?;
        let posts = self.recent_medias(id, SUMMARY_POSTS, cancel).await?;

        let avg_likes = if posts.is_empty() {
            0.0
        } else {
            posts.iter().map(|p| p.like_count as f64).sum::<f64>() / posts.len() as f64
        };
        let engagement_rate = if info.follower_count > 0 {
            avg_likes / info.follower_count as f64 * 100.0
        } else {
            0.0
        };

        Ok(EngagementSummary {
            username: target.to_string(),
            followers: info.follower_count,
            following: info.following_count,
            posts_analyzed: posts.len(),
            avg_likes,
            engagement_rate,
            most_recent: posts.iter().max_by_key(|p| p.taken_at).cloned(),
        })
    }

    /// Everyone who liked or commented on the target's recent posts.
    ///
    /// `scrape_likes_mode` 1 restricts the scrape to the most recent post.
    pub async fn scrape_likers_commenters(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<AudienceScrape, ActionError> {
        let user_id = self.user_id(target, cancel).await?;
        let mut posts = self
            .recent_medias(&user_id, self.config().max_posts_to_scrape, cancel)
            .await?;
        if self.config().scrape_likes_mode == 1 {
            posts.sort_by_key(|p| std::cmp::Reverse(p.taken_at));
            posts.truncate(1);
        }

        let results: Vec<Result<(Vec<String>, Vec<String>), ActionError>> = stream::iter(posts.iter())
            .map(|post| self.post_audience(post, cancel))
            .buffer_unordered(self.config().max_threads.max(1))
            .collect()
            .await;

        let mut scrape = AudienceScrape {
            target: target.to_string(),
            likers: BTreeSet::new(),
            commenters: BTreeSet::new(),
        };
        for result in results {
            match result {
                Ok((likers, commenters)) => {
                    scrape.likers.extend(likers);
                    scrape.commenters.extend(commenters);
                }
                Err(e) if e.is_identity_fatal() || e.is_dispatch_fatal() => return Err(e),
                Err(e) => debug!(identity = %self.handle(), "Skipping post of {}: {}", target, e),
            }
        }

        info!(
            identity = %self.handle(),
            "Scraped {} unique users for {} ({} likers, {} commenters)",
            scrape.all_users().len(),
            target,
            scrape.likers.len(),
            scrape.commenters.len()
        );
        Ok(scrape)
    }

    async fn post_audience(
        &self,
        post: &Media,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, Vec<String>), ActionError> {
        let client = self.client();
        let media_id = post.id.as_str();
        let likers = self
            .call("media_likers", cancel, move || client.media_likers(media_id))
            .await?;
        let amount = self.config().max_posts_to_scrape;
        let commenters = self
            .call("media_comments", cancel, move || client.media_comments(media_id, amount))
            .await?
            .into_iter()
            .map(|c| c.username)
            .collect();
        sleep_or_cancel(self.delays().next_delay(ActionKind::Scrape), cancel).await;
        Ok((likers, commenters))
    }

    /// Top posts at the first location matching `name` and their owners.
    pub async fn scrape_location(
        &self,
        name: &str,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<LocationScrape, ActionError> {
        let client = self.client();
        let locations = self
            .call("location_search", cancel, move || client.location_search(name))
            .await?;
        let location = locations.into_iter().next().ok_or_else(|| ActionError::NotFound {
            operation: "location_search".to_string(),
            reason: format!("no locations found for '{}'", name),
        })?;

        let amount = limit.unwrap_or(self.config().location_posts_limit);
        let location_id = location.id.as_str();
        let posts = self
            .call("location_medias", cancel, move || client.location_medias(location_id, amount))
            .await?;
        if posts.is_empty() {
            warn!(identity = %self.handle(), "No posts found for location {}", name);
        }

        let mut seen = HashSet::new();
        let owners = posts
            .iter()
            .map(|p| p.owner_username.clone())
            .filter(|owner| !owner.is_empty() && seen.insert(owner.clone()))
            .collect();

        info!(identity = %self.handle(), "Scraped {} posts from {}", posts.len(), name);
        Ok(LocationScrape {
            location_name: name.to_string(),
            location_id: location.id.clone(),
            posts,
            owners,
        })
    }

    /// Posts in which `target` is tagged.
    pub async fn scrape_tagged_posts(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<TaggedScrape, ActionError> {
        let user_id = self.user_id(target, cancel).await?;
        let client = self.client();
        let id = user_id.as_str();
        let posts = self
            .call("usertag_medias", cancel, move || client.usertag_medias(id, TAGGED_POSTS))
            .await?;
        info!(identity = %self.handle(), "Found {} tagged posts for {}", posts.len(), target);
        Ok(TaggedScrape {
            username: target.to_string(),
            user_id,
            posts,
        })
    }
}

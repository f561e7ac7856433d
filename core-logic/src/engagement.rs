//! Multi-post engagement sweeps on one target.
//!
//! Each like, comment or highlight view is its own quota unit; units that
//! find the quota exhausted are skipped, not failed. Units run concurrently
//! up to `max_threads`, and an identity-fatal or dispatch-fatal error halts
//! the remaining units and is returned to the caller.

use crate::delay::sleep_or_cancel;
use crate::error::{ActionError, ErrorKind};
use crate::remote::{Highlight, Media};
use crate::session::IdentitySession;
use crate::types::ActionKind;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// At most this many highlights are touched per target.
pub const MAX_HIGHLIGHTS: usize = 3;

/// Posts considered by a like/comment sweep.
pub const SWEEP_POSTS: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngagementTally {
    pub performed: usize,
    pub skipped_quota: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightOrder {
    Oldest,
    Latest,
    Random,
}

enum Unit {
    Performed,
    Skipped,
    Failed(ActionError),
}

impl IdentitySession {
    /// Like up to `amount` of the target's recent posts.
    pub async fn like_recent_posts(
        &self,
        target: &str,
        amount: u32,
        cancel: &CancellationToken,
    ) -> Result<EngagementTally, ActionError> {
        let user_id = self.user_id(target, cancel).await?;
        let medias = self.recent_medias(&user_id, amount, cancel).await?;
        let halt = cancel.child_token();

        let units: Vec<Unit> = stream::iter(medias.iter())
            .map(|media| self.like_unit(media, &halt))
            .buffer_unordered(self.config().max_threads.max(1))
            .collect()
            .await;

        let tally = tally(units)?;
        info!(
            identity = %self.handle(),
            "Liked {} posts of {} ({} skipped, {} failed)",
            tally.performed,
            target,
            tally.skipped_quota,
            tally.failed
        );
        Ok(tally)
    }

    /// Like and comment on each of the target's recent posts.
    pub async fn comment_and_like(
        &self,
        target: &str,
        comments: &[String],
        cancel: &CancellationToken,
    ) -> Result<EngagementTally, ActionError> {
        let user_id = self.user_id(target, cancel).await?;
        let medias = self.recent_medias(&user_id, SWEEP_POSTS, cancel).await?;
        let halt = cancel.child_token();

        let units: Vec<Unit> = stream::iter(medias.iter())
            .map(|media| {
                let halt = &halt;
                async move {
                    let liked = self.like_unit(media, halt).await;
                    if halt.is_cancelled() {
                        return vec![liked];
                    }
                    let commented = self.comment_unit(media, comments, halt).await;
                    vec![liked, commented]
                }
            })
            .buffer_unordered(self.config().max_threads.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        let tally = tally(units)?;
        info!(
            identity = %self.handle(),
            "Sweep on {}: {} actions, {} skipped, {} failed",
            target,
            tally.performed,
            tally.skipped_quota,
            tally.failed
        );
        Ok(tally)
    }

    /// View (and like, quota permitting) up to three of the target's highlights.
    pub async fn interact_with_highlights(
        &self,
        target: &str,
        order: HighlightOrder,
        cancel: &CancellationToken,
    ) -> Result<EngagementTally, ActionError> {
        let user_id = self.user_id(target, cancel).await?;
        let client = self.client();
        let id = user_id.as_str();
        let mut highlights = self
            .call("user_highlights", cancel, move || client.user_highlights(id))
            .await?;
        if highlights.is_empty() {
            info!(identity = %self.handle(), "No highlights found for {}", target);
            return Ok(EngagementTally::default());
        }

        match order {
            HighlightOrder::Oldest => highlights.sort_by_key(|h| h.created_at),
            HighlightOrder::Latest => {
                highlights.sort_by_key(|h| std::cmp::Reverse(h.created_at))
            }
            HighlightOrder::Random => self.shuffle(&mut highlights),
        }
        highlights.truncate(MAX_HIGHLIGHTS);
        let halt = cancel.child_token();

        let units: Vec<Unit> = stream::iter(highlights.iter())
            .map(|highlight| {
                let halt = &halt;
                async move {
                    let viewed = self.highlight_view_unit(highlight, halt).await;
                    if !matches!(viewed, Unit::Performed) {
                        return vec![viewed];
                    }
                    let liked = self.highlight_like_unit(highlight, halt).await;
                    vec![viewed, liked]
                }
            })
            .buffer_unordered(self.config().max_threads.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        tally(units)
    }

    async fn like_unit(&self, media: &Media, halt: &CancellationToken) -> Unit {
        let Some(reservation) = self.quota().try_reserve(ActionKind::Like) else {
            return Unit::Skipped;
        };
        let client = self.client();
        let media_id = media.id.as_str();
        let result = self
            .call("media_like", halt, move || client.media_like(media_id))
            .await;
        let unit = settle(result, halt);
        if matches!(unit, Unit::Performed) {
            reservation.commit();
            sleep_or_cancel(self.delays().next_delay(ActionKind::Like), halt).await;
        }
        unit
    }

    async fn comment_unit(&self, media: &Media, comments: &[String], halt: &CancellationToken) -> Unit {
        let Some(reservation) = self.quota().try_reserve(ActionKind::Comment) else {
            return Unit::Skipped;
        };
        let text = self.random_comment(comments);
        let client = self.client();
        let (media_id, body) = (media.id.as_str(), text.as_str());
        let result = self
            .call("media_comment", halt, move || client.media_comment(media_id, body))
            .await;
        let unit = settle(result, halt);
        if matches!(unit, Unit::Performed) {
            reservation.commit();
            sleep_or_cancel(self.delays().next_delay(ActionKind::Comment), halt).await;
        }
        unit
    }

    async fn highlight_view_unit(&self, highlight: &Highlight, halt: &CancellationToken) -> Unit {
        let client = self.client();
        let highlight_id = highlight.id.as_str();
        let result = self
            .call("highlight_seen", halt, move || client.highlight_seen(highlight_id))
            .await;
        let unit = settle(result, halt);
        if matches!(unit, Unit::Performed) {
            sleep_or_cancel(self.delays().next_delay(ActionKind::StoryView), halt).await;
        }
        unit
    }

    async fn highlight_like_unit(&self, highlight: &Highlight, halt: &CancellationToken) -> Unit {
        let Some(reservation) = self.quota().try_reserve(ActionKind::Like) else {
            return Unit::Skipped;
        };
        let client = self.client();
        let highlight_id = highlight.id.as_str();
        let result = self
            .call("media_like", halt, move || client.media_like(highlight_id))
            .await;
        let unit = settle(result, halt);
        if matches!(unit, Unit::Performed) {
            reservation.commit();
        }
        unit
    }
}

/// Classify one unit result; fatal errors stop the sibling units.
fn settle(result: Result<(), ActionError>, halt: &CancellationToken) -> Unit {
    match result {
        Ok(()) => Unit::Performed,
        Err(e) => {
            if e.is_identity_fatal() || e.is_dispatch_fatal() {
                halt.cancel();
            } else if e.kind() != ErrorKind::Cancelled {
                warn!("Engagement unit failed: {}", e);
            }
            Unit::Failed(e)
        }
    }
}

fn tally(units: Vec<Unit>) -> Result<EngagementTally, ActionError> {
    let mut tally = EngagementTally::default();
    let mut fatal = None;
    for unit in units {
        match unit {
            Unit::Performed => tally.performed += 1,
            Unit::Skipped => tally.skipped_quota += 1,
            Unit::Failed(e) => {
                tally.failed += 1;
                if fatal.is_none() && (e.is_identity_fatal() || e.is_dispatch_fatal()) {
                    fatal = Some(e);
                }
            }
        }
    }
    match fatal {
        Some(e) => Err(e),
        None => Ok(tally),
    }
}

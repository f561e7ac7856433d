//! Campaign definitions: an action kind plus its per-target parameters.

use crate::types::ActionKind;
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::Path;

pub const DEFAULT_DM_TEMPLATE: &str = "Hello {name},

I came across your profile and wanted to connect.

Looking forward to hearing from you.

Best regards";

pub const DEFAULT_COMMENTS: [&str; 5] = [
    "Great content! 👏",
    "Awesome post! 😊",
    "Love this! ❤️",
    "Nice work! 👍",
    "Looking good! 🤩",
];

pub const STORY_REACTIONS: [&str; 7] = ["❤️", "🔥", "😍", "👏", "👍", "😊", "🤩"];

#[derive(Debug, Clone, PartialEq)]
pub enum Campaign {
    Follow,
    Unfollow,
    /// Like the target's most recent post
    Like,
    /// Comment on the target's most recent post with a random line from the pool
    Comment { comments: Vec<String> },
    /// Send `template` with `{name}` substituted
    DirectMessage { template: String },
    /// View the target's stories, optionally liking and reacting to them
    StoryView { like: bool, react: bool },
}

impl Campaign {
    pub fn kind(&self) -> ActionKind {
        match self {
            Campaign::Follow => ActionKind::Follow,
            Campaign::Unfollow => ActionKind::Unfollow,
            Campaign::Like => ActionKind::Like,
            Campaign::Comment { .. } => ActionKind::Comment,
            Campaign::DirectMessage { .. } => ActionKind::Dm,
            Campaign::StoryView { .. } => ActionKind::StoryView,
        }
    }

    pub fn comment_with_defaults() -> Self {
        Campaign::Comment {
            comments: DEFAULT_COMMENTS.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn dm_with_default_template() -> Self {
        Campaign::DirectMessage {
            template: DEFAULT_DM_TEMPLATE.to_string(),
        }
    }
}

/// Replace `{name}` with the first word of `full_name`, or `fallback` when
/// the full name is blank.
pub fn personalize(template: &str, full_name: &str, fallback: &str) -> String {
    let name = full_name.split_whitespace().next().unwrap_or(fallback);
    template.replace("{name}", name)
}

/// Pick a random line from `pool`, falling back to the default comments.
pub fn pick_comment<R: Rng + ?Sized>(pool: &[String], rng: &mut R) -> String {
    match pool.choose(rng) {
        Some(comment) => comment.clone(),
        None => DEFAULT_COMMENTS
            .choose(rng)
            .copied()
            .unwrap_or(DEFAULT_COMMENTS[0])
            .to_string(),
    }
}

pub fn pick_reaction<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    STORY_REACTIONS.choose(rng).copied().unwrap_or(STORY_REACTIONS[0])
}

/// Non-empty trimmed lines of a text file.
pub fn load_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Whole-file message template, or the built-in one if the file is missing or blank.
pub fn load_template(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => content.trim().to_string(),
        Ok(_) => {
            tracing::warn!("{} is empty, using default message template", path.display());
            DEFAULT_DM_TEMPLATE.to_string()
        }
        Err(e) => {
            tracing::warn!("Using default message template: {}", e);
            DEFAULT_DM_TEMPLATE.to_string()
        }
    }
}

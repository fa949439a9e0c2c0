//! Content source abstraction.
//!
//! A source lists candidate items, answers them, and supplies the thread context
//! the responder needs. The engine only ever talks to `dyn ContentSource`.

pub mod reddit;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

pub use reddit::{RedditConfig, RedditSource};

/// What kind of thing an item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Post,
    Comment,
    /// A comment that replies to one of our own comments.
    InboxReply,
}

/// A single item pulled from the source. Ephemeral: never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateItem {
    pub id: String,
    pub kind: ItemKind,
    /// `None` for deleted or anonymous authors.
    pub author: Option<String>,
    /// Posts only.
    pub title: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// Post this item belongs to; a post's own id for posts.
    pub post_id: String,
    /// Full name of the parent (`t1_...` / `t3_...`) for comments.
    pub parent_id: Option<String>,
    pub community: String,
    /// Comment count for posts, score for comments.
    pub engagement: u32,
    pub permalink: String,
}

impl CandidateItem {
    /// Title and body joined, which is what summon and hostility checks read for posts.
    pub fn full_text(&self) -> String {
        match &self.title {
            Some(title) if !title.is_empty() => format!("{title}\n{}", self.body),
            _ => self.body.clone(),
        }
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        now.signed_duration_since(self.created_at).num_seconds() as f64 / 3600.0
    }
}

/// One comment in a thread, as fed to the responder.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadComment {
    pub author: Option<String>,
    pub body: String,
    pub score: i64,
}

/// Conversation surrounding an item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadContext {
    pub post_title: String,
    /// Snippet of the post body.
    pub post_body: String,
    /// Ancestor comments, oldest first.
    pub parents: Vec<ThreadComment>,
    /// Top-level comments, used by discussion summaries.
    pub comments: Vec<ThreadComment>,
}

/// Handle to an emitted reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHandle {
    pub id: String,
    pub permalink: Option<String>,
}

/// Maximum ancestor comments included in a context.
pub const MAX_CONTEXT_PARENTS: usize = 5;

/// Data source the dispatcher reads from and writes to.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Newest posts in the configured community.
    async fn list_recent_posts(&self, limit: usize) -> Result<Vec<CandidateItem>, SourceError>;

    /// Newest comments in the configured community.
    async fn list_recent_comments(&self, limit: usize) -> Result<Vec<CandidateItem>, SourceError>;

    /// Replies to our own comments.
    async fn list_inbox_replies(&self, limit: usize) -> Result<Vec<CandidateItem>, SourceError>;

    /// Names of the community's moderators.
    async fn list_moderators(&self) -> Result<Vec<String>, SourceError>;

    /// Post snippet and up to [`MAX_CONTEXT_PARENTS`] ancestors of an item.
    async fn fetch_context(&self, item: &CandidateItem) -> Result<ThreadContext, SourceError>;

    /// Top comments of a post.
    async fn list_post_comments(
        &self,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<ThreadComment>, SourceError>;

    /// Reply to an item.
    async fn reply(&self, item: &CandidateItem, text: &str) -> Result<ReplyHandle, SourceError>;

    /// Pin a reply to the top of its thread.
    async fn pin_reply(&self, handle: &ReplyHandle) -> Result<(), SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> CandidateItem {
        CandidateItem {
            id: "abc".into(),
            kind: ItemKind::Post,
            author: Some("alice".into()),
            title: Some("Scaling laws".into()),
            body: "Body text".into(),
            created_at: DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            post_id: "abc".into(),
            parent_id: None,
            community: "accelerate".into(),
            engagement: 12,
            permalink: "/r/accelerate/comments/abc".into(),
        }
    }

    #[test]
    fn full_text_joins_title_and_body() {
        assert_eq!(post().full_text(), "Scaling laws\nBody text");

        let mut comment = post();
        comment.title = None;
        assert_eq!(comment.full_text(), "Body text");
    }

    #[test]
    fn age_in_hours() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T13:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!((post().age_hours(now) - 3.5).abs() < f64::EPSILON);
    }
}

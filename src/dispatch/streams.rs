//! Candidate streams and their fixed properties.

use crate::policy::QuotaLane;
use crate::responder::ResponseMode;
use crate::source::CandidateItem;
use crate::state::DedupCategory;

/// A source of candidates, processed in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    InboxReplies,
    CommentSummons,
    PostSummons,
    LongPosts,
    Milestones,
    LongComments,
}

impl StreamKind {
    /// Every stream, in priority order.
    pub const ALL: [StreamKind; 6] = [
        StreamKind::InboxReplies,
        StreamKind::CommentSummons,
        StreamKind::PostSummons,
        StreamKind::LongPosts,
        StreamKind::Milestones,
        StreamKind::LongComments,
    ];

    /// Lower runs first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::InboxReplies => 0,
            Self::CommentSummons => 1,
            Self::PostSummons => 2,
            Self::LongPosts => 3,
            Self::Milestones => 4,
            Self::LongComments => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::InboxReplies => "inbox_replies",
            Self::CommentSummons => "comment_summons",
            Self::PostSummons => "post_summons",
            Self::LongPosts => "long_posts",
            Self::Milestones => "milestones",
            Self::LongComments => "long_comments",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(label))
    }

    pub fn lane(&self) -> QuotaLane {
        match self {
            Self::InboxReplies | Self::CommentSummons | Self::PostSummons => QuotaLane::Replies,
            Self::LongPosts | Self::Milestones | Self::LongComments => QuotaLane::Summaries,
        }
    }

    /// Ledger category, `None` for milestones (tracked by watermark instead).
    pub fn category(&self) -> Option<DedupCategory> {
        match self {
            Self::InboxReplies => Some(DedupCategory::RepliedToComments),
            Self::CommentSummons | Self::PostSummons => Some(DedupCategory::SummonResponses),
            Self::LongPosts => Some(DedupCategory::ProcessedPosts),
            Self::LongComments => Some(DedupCategory::ProcessedComments),
            Self::Milestones => None,
        }
    }

    /// A category that also counts as "already answered" for this stream.
    ///
    /// A reply to one of our comments can show up both in the inbox and in the
    /// comment listing; whichever stream handled it first wins.
    pub fn sibling_category(&self) -> Option<DedupCategory> {
        match self {
            Self::InboxReplies => Some(DedupCategory::SummonResponses),
            Self::CommentSummons => Some(DedupCategory::RepliedToComments),
            _ => None,
        }
    }

    /// Ledger key for an item. Post summons share a category with comment
    /// summons, so their ids are namespaced.
    pub fn dedup_key(&self, item: &CandidateItem) -> String {
        match self {
            Self::PostSummons => format!("post_{}", item.id),
            _ => item.id.clone(),
        }
    }

    /// Conversational streams are subject to the same-user cooldown.
    pub fn applies_cooldown(&self) -> bool {
        matches!(
            self,
            Self::InboxReplies | Self::CommentSummons | Self::PostSummons
        )
    }

    /// Whether the stream reads the post listing (as opposed to comments or inbox).
    pub fn reads_posts(&self) -> bool {
        matches!(self, Self::PostSummons | Self::LongPosts | Self::Milestones)
    }

    /// Generation mode; milestones carry their rung.
    pub fn mode(&self, milestone: Option<u32>) -> ResponseMode {
        match self {
            Self::InboxReplies => ResponseMode::Reply,
            Self::CommentSummons => ResponseMode::Summon,
            Self::PostSummons => ResponseMode::PostSummon,
            Self::LongPosts => ResponseMode::PostTldr,
            Self::Milestones => ResponseMode::MilestoneSummary {
                threshold: milestone.unwrap_or_default(),
            },
            Self::LongComments => ResponseMode::CommentTldr,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

//! Comment-count milestones.
//!
//! Each post carries a watermark: the highest rung of the ladder already
//! summarised. A post qualifies again only when its count reaches a rung above the
//! watermark, and it then jumps straight to the highest such rung.

use std::collections::BTreeMap;

/// Ascending ladder of comment-count thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneLadder {
    thresholds: Vec<u32>,
}

impl MilestoneLadder {
    pub fn new(mut thresholds: Vec<u32>) -> Self {
        thresholds.sort_unstable();
        thresholds.dedup();
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }

    /// Highest rung ≤ `current_count` that is strictly above `last_watermark`.
    pub fn next_milestone(&self, current_count: u32, last_watermark: u32) -> Option<u32> {
        self.thresholds
            .iter()
            .rev()
            .copied()
            .find(|&t| t <= current_count && t > last_watermark)
    }

    /// Watermark for a post, 0 when it has never been summarised.
    pub fn watermark(watermarks: &BTreeMap<String, u32>, post_id: &str) -> u32 {
        watermarks.get(post_id).copied().unwrap_or(0)
    }

    /// Ledger key for one rung of one post.
    pub fn rung_key(post_id: &str, threshold: u32) -> String {
        format!("{post_id}:{threshold}")
    }

    /// Move a post's watermark up to `threshold`. Never moves it down.
    /// Returns whether the watermark changed.
    pub fn advance(watermarks: &mut BTreeMap<String, u32>, post_id: &str, threshold: u32) -> bool {
        let current = Self::watermark(watermarks, post_id);
        if threshold <= current {
            return false;
        }
        watermarks.insert(post_id.to_string(), threshold);
        true
    }
}

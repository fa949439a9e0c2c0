//! Bounded dedup ledger.
//!
//! One insertion-ordered set per category. Marking an id appends it and evicts the
//! oldest ids beyond the category capacity; re-marking a known id is a no-op and
//! does not refresh its position.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::LedgerCapacities;

/// Action categories tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupCategory {
    /// Inbox replies we have answered or terminally skipped.
    RepliedToComments,
    /// Comments and posts that summoned us.
    SummonResponses,
    /// Posts given a TLDR.
    ProcessedPosts,
    /// Comments given a TLDR.
    ProcessedComments,
    /// Milestone rungs whose summary failed, keyed `{post_id}:{threshold}`.
    MilestoneFailures,
}

impl DedupCategory {
    pub const ALL: [DedupCategory; 5] = [
        DedupCategory::RepliedToComments,
        DedupCategory::SummonResponses,
        DedupCategory::ProcessedPosts,
        DedupCategory::ProcessedComments,
        DedupCategory::MilestoneFailures,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::RepliedToComments => "replied-to-comments",
            Self::SummonResponses => "summon-responses",
            Self::ProcessedPosts => "processed-posts",
            Self::ProcessedComments => "processed-comments",
            Self::MilestoneFailures => "milestone-failures",
        }
    }

    pub fn capacity(&self, caps: &LedgerCapacities) -> usize {
        match self {
            Self::RepliedToComments => caps.replied_to_comments,
            Self::SummonResponses => caps.summon_responses,
            Self::ProcessedPosts => caps.processed_posts,
            Self::ProcessedComments => caps.processed_comments,
            Self::MilestoneFailures => caps.milestone_failures,
        }
    }
}

/// Insertion-ordered set with a capacity. Serialized as a plain list, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct BoundedSet {
    order: VecDeque<String>,
    index: HashSet<String>,
    capacity: usize,
}

impl BoundedSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            index: HashSet::new(),
            capacity,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Append an id. Returns false if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.index.contains(id) {
            return false;
        }
        self.order.push_back(id.to_string());
        self.index.insert(id.to_string());
        self.evict();
        true
    }

    /// Change the capacity, dropping the oldest ids if the set is now too large.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    fn evict(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(removed) = self.order.pop_front() {
                self.index.remove(&removed);
            }
        }
    }
}

/// Compares contents only; capacity is not part of the value.
impl PartialEq for BoundedSet {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for BoundedSet {}

impl From<Vec<String>> for BoundedSet {
    fn from(raw: Vec<String>) -> Self {
        // Capacity is applied by `DedupLedger::configure` once config is known.
        let mut set = Self::with_capacity(usize::MAX);
        for id in raw {
            let id = id.trim();
            if !id.is_empty() {
                set.insert(id);
            }
        }
        set
    }
}

impl From<BoundedSet> for Vec<String> {
    fn from(set: BoundedSet) -> Self {
        set.order.into_iter().collect()
    }
}

/// All dedup categories, keyed by category label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupLedger {
    sets: BTreeMap<String, BoundedSet>,
}

impl DedupLedger {
    /// Apply capacities to every category, creating empty sets as needed.
    pub fn configure(&mut self, caps: &LedgerCapacities) {
        for category in DedupCategory::ALL {
            let capacity = category.capacity(caps);
            self.sets
                .entry(category.label().to_string())
                .or_insert_with(|| BoundedSet::with_capacity(capacity))
                .set_capacity(capacity);
        }
    }

    pub fn contains(&self, category: DedupCategory, id: &str) -> bool {
        self.sets
            .get(category.label())
            .is_some_and(|set| set.contains(id))
    }

    /// Record an id as handled. Returns false if it was already present.
    pub fn mark(&mut self, category: DedupCategory, id: &str) -> bool {
        self.sets
            .entry(category.label().to_string())
            .or_insert_with(|| BoundedSet::with_capacity(usize::MAX))
            .insert(id)
    }

    pub fn len(&self, category: DedupCategory) -> usize {
        self.sets.get(category.label()).map_or(0, BoundedSet::len)
    }

    pub fn total(&self) -> usize {
        self.sets.values().map(BoundedSet::len).sum()
    }
}

//! Persisted dispatcher state.
//!
//! A single document, loaded at the start of a run, mutated in place, and written
//! back in one piece at the end. Every field defaults, so older or partial
//! documents load cleanly.

pub mod ledger;
pub mod libsql_store;
pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::LedgerCapacities;
use crate::policy::{ModeratorCache, QuotaCounter, UserCooldown};
use crate::stats::UsageStats;

pub use ledger::{BoundedSet, DedupCategory, DedupLedger};
pub use libsql_store::LibSqlStateStore;
pub use store::{JsonFileStore, MemoryStateStore, StateStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub dedup_sets: DedupLedger,
    pub user_cooldowns: BTreeMap<String, UserCooldown>,
    pub moderator_cache: ModeratorCache,
    /// Post id to highest milestone already summarised.
    pub milestone_watermarks: BTreeMap<String, u32>,
    /// Lane label to daily counter.
    pub quota_counters: BTreeMap<String, QuotaCounter>,
    pub stats: UsageStats,
}

impl PersistedState {
    /// Apply configured ledger capacities after loading.
    pub fn configure(&mut self, caps: &LedgerCapacities) {
        self.dedup_sets.configure(caps);
    }

    /// A copy of `base` carrying only this state's dedup sets and watermarks.
    ///
    /// Used by dry runs that keep terminal markers but nothing else.
    pub fn with_markers_from(base: &PersistedState, run: &PersistedState) -> PersistedState {
        PersistedState {
            dedup_sets: run.dedup_sets.clone(),
            milestone_watermarks: run.milestone_watermarks.clone(),
            ..base.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;

    #[test]
    fn partial_document_loads_with_defaults() {
        let raw = r#"{ "milestone_watermarks": { "p1": 50 } }"#;
        let state: PersistedState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.milestone_watermarks["p1"], 50);
        assert!(state.user_cooldowns.is_empty());
        assert_eq!(state.stats.runs, 0);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = r#"{ "legacy_field": [1, 2, 3] }"#;
        let state: PersistedState = serde_json::from_str(raw).unwrap();
        assert_eq!(state, PersistedState::default());
    }

    #[test]
    fn markers_overlay_keeps_base_counters() {
        let mut base = PersistedState::default();
        base.quota_counters.insert(
            "summaries".into(),
            QuotaCounter {
                daily_count: 5,
                reset_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            },
        );

        let mut run = base.clone();
        run.dedup_sets.mark(DedupCategory::ProcessedPosts, "p1");
        run.milestone_watermarks.insert("p2".into(), 20);
        run.quota_counters.get_mut("summaries").unwrap().daily_count = 6;
        run.stats.record_run(Utc::now());

        let merged = PersistedState::with_markers_from(&base, &run);
        assert!(merged.dedup_sets.contains(DedupCategory::ProcessedPosts, "p1"));
        assert_eq!(merged.milestone_watermarks["p2"], 20);
        assert_eq!(merged.quota_counters["summaries"].daily_count, 5);
        assert_eq!(merged.stats.runs, 0);
    }
}

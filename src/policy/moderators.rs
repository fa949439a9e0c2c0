//! TTL-bounded moderator cache.
//!
//! The persisted part (`ModeratorCache`) lives in state. `ModeratorDirectory` holds
//! the per-run bookkeeping: the source is asked at most once per invocation, and a
//! failed refresh leaves the previous set in place.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::MAX_CACHE_DAYS;
use crate::source::ContentSource;

/// Persisted moderator names and when they were fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeratorCache {
    #[serde(default)]
    pub moderators: Vec<String>,
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Moderator lookups with lazy refresh.
#[derive(Debug)]
pub struct ModeratorDirectory {
    ttl: Duration,
    refresh_attempted: bool,
    lookup: Option<HashSet<String>>,
}

impl ModeratorDirectory {
    pub fn new(ttl_days: f64) -> Self {
        let days = ttl_days.clamp(0.0, MAX_CACHE_DAYS);
        let ttl_secs = (days * 86_400.0).round() as i64;
        Self {
            ttl: Duration::seconds(ttl_secs.max(0)),
            refresh_attempted: false,
            lookup: None,
        }
    }

    /// Whether the cache is empty or older than the TTL.
    pub fn needs_refresh(&self, cache: &ModeratorCache, now: DateTime<Utc>) -> bool {
        match cache.last_refresh {
            _ if cache.moderators.is_empty() => true,
            None => true,
            Some(at) => now.signed_duration_since(at) >= self.ttl,
        }
    }

    /// Current moderator set, lowercased, refreshing from the source if due.
    pub async fn get_moderators(
        &mut self,
        cache: &mut ModeratorCache,
        source: &dyn ContentSource,
        now: DateTime<Utc>,
    ) -> &HashSet<String> {
        if !self.refresh_attempted && self.needs_refresh(cache, now) {
            self.refresh_attempted = true;
            match source.list_moderators().await {
                Ok(names) => {
                    info!(
                        source = source.name(),
                        count = names.len(),
                        "Refreshed moderator list"
                    );
                    cache.moderators = names;
                    cache.last_refresh = Some(match cache.last_refresh {
                        Some(prev) if prev > now => prev,
                        _ => now,
                    });
                    self.lookup = None;
                }
                Err(e) => {
                    warn!(
                        source = source.name(),
                        kind = %e.kind(),
                        error = %e,
                        cached = cache.moderators.len(),
                        "Moderator refresh failed, using cached list"
                    );
                }
            }
        }

        self.lookup.get_or_insert_with(|| {
            cache
                .moderators
                .iter()
                .map(|name| name.to_lowercase())
                .collect()
        })
    }

    /// Whether an author is a moderator. A missing author never is.
    pub async fn is_privileged(
        &mut self,
        author: Option<&str>,
        cache: &mut ModeratorCache,
        source: &dyn ContentSource,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(author) = author else {
            return false;
        };
        self.get_moderators(cache, source, now)
            .await
            .contains(&author.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::SourceError;
    use crate::source::{CandidateItem, ReplyHandle, ThreadComment, ThreadContext};

    struct ModSource {
        result: Mutex<Option<Result<Vec<String>, SourceError>>>,
        calls: Mutex<usize>,
    }

    impl ModSource {
        fn ok(names: &[&str]) -> Self {
            Self {
                result: Mutex::new(Some(Ok(names.iter().map(|s| s.to_string()).collect()))),
                calls: Mutex::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                result: Mutex::new(Some(Err(SourceError::Network {
                    source_name: "mods".into(),
                    reason: "timeout".into(),
                }))),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ContentSource for ModSource {
        fn name(&self) -> &str {
            "mods"
        }
        async fn list_recent_posts(&self, _: usize) -> Result<Vec<CandidateItem>, SourceError> {
            Ok(vec![])
        }
        async fn list_recent_comments(&self, _: usize) -> Result<Vec<CandidateItem>, SourceError> {
            Ok(vec![])
        }
        async fn list_inbox_replies(&self, _: usize) -> Result<Vec<CandidateItem>, SourceError> {
            Ok(vec![])
        }
        async fn list_moderators(&self) -> Result<Vec<String>, SourceError> {
            *self.calls.lock().unwrap() += 1;
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(vec![]))
        }
        async fn fetch_context(&self, _: &CandidateItem) -> Result<ThreadContext, SourceError> {
            Ok(ThreadContext::default())
        }
        async fn list_post_comments(
            &self,
            _: &str,
            _: usize,
        ) -> Result<Vec<ThreadComment>, SourceError> {
            Ok(vec![])
        }
        async fn reply(&self, _: &CandidateItem, _: &str) -> Result<ReplyHandle, SourceError> {
            unreachable!()
        }
        async fn pin_reply(&self, _: &ReplyHandle) -> Result<(), SourceError> {
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-10T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn empty_cache_refreshes() {
        let source = ModSource::ok(&["ModAlice", "bob"]);
        let mut cache = ModeratorCache::default();
        let mut dir = ModeratorDirectory::new(3.0);

        assert!(dir.is_privileged(Some("modalice"), &mut cache, &source, now()).await);
        assert_eq!(cache.moderators.len(), 2);
        assert_eq!(cache.last_refresh, Some(now()));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn fresh_cache_is_not_refreshed() {
        let source = ModSource::ok(&["someone_else"]);
        let mut cache = ModeratorCache {
            moderators: vec!["carol".into()],
            last_refresh: Some(now() - Duration::days(1)),
        };
        let mut dir = ModeratorDirectory::new(3.0);

        assert!(dir.is_privileged(Some("Carol"), &mut cache, &source, now()).await);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn expired_cache_is_replaced_wholesale() {
        let source = ModSource::ok(&["dave"]);
        let mut cache = ModeratorCache {
            moderators: vec!["carol".into()],
            last_refresh: Some(now() - Duration::days(3)),
        };
        let mut dir = ModeratorDirectory::new(3.0);

        assert!(!dir.is_privileged(Some("carol"), &mut cache, &source, now()).await);
        assert_eq!(cache.moderators, vec!["dave".to_string()]);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_set() {
        let source = ModSource::failing();
        let stamp = now() - Duration::days(10);
        let mut cache = ModeratorCache {
            moderators: vec!["carol".into()],
            last_refresh: Some(stamp),
        };
        let mut dir = ModeratorDirectory::new(3.0);

        assert!(dir.is_privileged(Some("carol"), &mut cache, &source, now()).await);
        assert_eq!(cache.last_refresh, Some(stamp));

        // Not retried within the same run.
        dir.is_privileged(Some("carol"), &mut cache, &source, now()).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn missing_author_is_never_privileged() {
        let source = ModSource::ok(&["carol"]);
        let mut cache = ModeratorCache::default();
        let mut dir = ModeratorDirectory::new(3.0);

        assert!(!dir.is_privileged(None, &mut cache, &source, now()).await);
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn oversized_ttl_is_clamped() {
        let dir = ModeratorDirectory::new(1e300);
        let cache = ModeratorCache {
            moderators: vec!["carol".into()],
            last_refresh: Some(Utc::now() - Duration::days(365)),
        };
        assert!(!dir.needs_refresh(&cache, Utc::now()));
        assert!(ModeratorDirectory::new(f64::NAN).needs_refresh(&cache, Utc::now()));
    }

    #[test]
    fn last_refresh_never_moves_backwards() {
        let dir = ModeratorDirectory::new(3.0);
        let cache = ModeratorCache {
            moderators: vec!["carol".into()],
            last_refresh: Some(now() + Duration::hours(1)),
        };
        assert!(!dir.needs_refresh(&cache, now()));
    }
}

//! Configuration types.
//!
//! `DispatchConfig` carries every policy knob the engine reads. It is built once
//! (defaults, then environment overrides) and handed to the engine by value.

use std::str::FromStr;

use crate::classifier::{PatternSpec, default_patterns};
use crate::dispatch::StreamKind;
use crate::error::ConfigError;

/// Upper bound for hour-valued knobs (one year).
pub const MAX_HOURS: f64 = 8_760.0;
/// Upper bound for the moderator cache TTL (ten years).
pub const MAX_CACHE_DAYS: f64 = 3_650.0;

/// Per-run and per-day caps for one quota lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneLimits {
    pub per_run: u32,
    pub per_day: u32,
}

/// Same-user throttle settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownConfig {
    /// Actions allowed against one user before the window check engages.
    pub grace: u32,
    /// Window length, measured from the first action of the cycle.
    pub window_hours: f64,
}

/// Capacity of each dedup category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerCapacities {
    pub replied_to_comments: usize,
    pub summon_responses: usize,
    pub processed_posts: usize,
    pub processed_comments: usize,
    pub milestone_failures: usize,
}

impl Default for LedgerCapacities {
    fn default() -> Self {
        Self {
            replied_to_comments: 2000,
            summon_responses: 2000,
            processed_posts: 1000,
            processed_comments: 1000,
            milestone_failures: 500,
        }
    }
}

/// How many items each listing call asks the source for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub inbox: usize,
    pub comments: usize,
    pub posts: usize,
    /// Comments pulled into a milestone summary.
    pub thread_comments: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            inbox: 50,
            comments: 100,
            posts: 50,
            thread_comments: 40,
        }
    }
}

/// Dispatcher policy configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Community the bot operates in.
    pub community: String,
    /// The responder identity; items authored by it are never answered.
    pub bot_username: String,
    /// Items older than this are terminally skipped.
    pub max_age_hours: f64,
    /// Minimum words for a post to get a TLDR.
    pub post_word_threshold: usize,
    /// Minimum words for a comment to get a TLDR.
    pub comment_word_threshold: usize,
    /// Ascending comment-count ladder for discussion summaries.
    pub comment_milestones: Vec<u32>,
    /// Inbox replies and summons.
    pub replies: LaneLimits,
    /// Post TLDRs, milestone summaries, comment TLDRs.
    pub summaries: LaneLimits,
    /// Milestone summaries are rate limited independently of the summaries lane.
    pub max_milestone_summaries_per_run: u32,
    pub min_reply_words: usize,
    pub max_reply_words: usize,
    pub cooldown: CooldownConfig,
    pub moderator_cache_ttl_days: f64,
    pub ledger: LedgerCapacities,
    pub fetch: FetchLimits,
    /// Enabled streams. They always run in priority order.
    pub streams: Vec<StreamKind>,
    /// Sticky post TLDRs after posting them.
    pub pin_post_summaries: bool,
    /// Save state after every successful action, not only at the end of the run.
    pub persist_after_each_action: bool,
    /// Exercise every decision without generating or emitting anything.
    pub dry_run: bool,
    /// On a dry run, still save dedup markers and milestone watermarks so a repeated
    /// dry run skips the same items.
    pub persist_dry_run_markers: bool,
    pub patterns: Vec<PatternSpec>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            community: "accelerate".to_string(),
            bot_username: String::new(),
            max_age_hours: 24.0,
            post_word_threshold: 270,
            comment_word_threshold: 270,
            comment_milestones: vec![20, 50, 100],
            replies: LaneLimits {
                per_run: 1,
                per_day: 30,
            },
            summaries: LaneLimits {
                per_run: 1,
                per_day: 40,
            },
            max_milestone_summaries_per_run: 1,
            min_reply_words: 10,
            max_reply_words: 75,
            cooldown: CooldownConfig {
                grace: 2,
                window_hours: 1.0,
            },
            moderator_cache_ttl_days: 3.0,
            ledger: LedgerCapacities::default(),
            fetch: FetchLimits::default(),
            streams: StreamKind::ALL.to_vec(),
            pin_post_summaries: true,
            persist_after_each_action: false,
            dry_run: false,
            persist_dry_run_markers: true,
            patterns: default_patterns(),
        }
    }
}

impl DispatchConfig {
    /// Build config from defaults overridden by `DISPATCH_*` environment variables.
    ///
    /// Unlike credentials, every policy variable is optional. A variable that is
    /// present but unparsable is a configuration error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(community) = env_string("DISPATCH_COMMUNITY") {
            config.community = community;
        }
        if let Some(v) = env_parse("DISPATCH_MAX_AGE_HOURS")? {
            config.max_age_hours = v;
        }
        if let Some(v) = env_parse("DISPATCH_POST_WORD_THRESHOLD")? {
            config.post_word_threshold = v;
        }
        if let Some(v) = env_parse("DISPATCH_COMMENT_WORD_THRESHOLD")? {
            config.comment_word_threshold = v;
        }
        if let Some(raw) = env_string("DISPATCH_COMMENT_MILESTONES") {
            config.comment_milestones = parse_ladder("DISPATCH_COMMENT_MILESTONES", &raw)?;
        }
        if let Some(v) = env_parse("DISPATCH_REPLIES_PER_RUN")? {
            config.replies.per_run = v;
        }
        if let Some(v) = env_parse("DISPATCH_REPLIES_PER_DAY")? {
            config.replies.per_day = v;
        }
        if let Some(v) = env_parse("DISPATCH_SUMMARIES_PER_RUN")? {
            config.summaries.per_run = v;
        }
        if let Some(v) = env_parse("DISPATCH_SUMMARIES_PER_DAY")? {
            config.summaries.per_day = v;
        }
        if let Some(v) = env_parse("DISPATCH_COOLDOWN_GRACE")? {
            config.cooldown.grace = v;
        }
        if let Some(v) = env_parse("DISPATCH_COOLDOWN_HOURS")? {
            config.cooldown.window_hours = v;
        }
        if let Some(v) = env_parse("DISPATCH_MOD_CACHE_DAYS")? {
            config.moderator_cache_ttl_days = v;
        }
        if let Some(v) = env_parse("DISPATCH_PIN_SUMMARIES")? {
            config.pin_post_summaries = v;
        }
        if let Some(v) = env_parse("DISPATCH_PERSIST_EACH_ACTION")? {
            config.persist_after_each_action = v;
        }
        if let Some(raw) = env_string("DISPATCH_STREAMS") {
            config.streams = parse_streams(&raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.comment_milestones.is_empty() {
            return Err(invalid("comment_milestones", "ladder must not be empty"));
        }
        if self.comment_milestones.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid(
                "comment_milestones",
                "ladder must be strictly ascending",
            ));
        }
        if self.comment_milestones[0] == 0 {
            return Err(invalid("comment_milestones", "thresholds must be positive"));
        }
        check_span("max_age_hours", self.max_age_hours, false, MAX_HOURS)?;
        check_span("cooldown.window_hours", self.cooldown.window_hours, true, MAX_HOURS)?;
        check_span(
            "moderator_cache_ttl_days",
            self.moderator_cache_ttl_days,
            true,
            MAX_CACHE_DAYS,
        )?;
        if self.min_reply_words > self.max_reply_words {
            return Err(invalid(
                "min_reply_words",
                "must not exceed max_reply_words",
            ));
        }
        let ledger = &self.ledger;
        if [
            ledger.replied_to_comments,
            ledger.summon_responses,
            ledger.processed_posts,
            ledger.processed_comments,
            ledger.milestone_failures,
        ]
        .contains(&0)
        {
            return Err(invalid("ledger", "capacities must be positive"));
        }
        Ok(())
    }
}

/// Finite and within `0..=max`; zero allowed only where `allow_zero`.
fn check_span(key: &str, value: f64, allow_zero: bool, max: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(invalid(key, "must be a finite number"));
    }
    if value < 0.0 || (value == 0.0 && !allow_zero) {
        return Err(invalid(
            key,
            if allow_zero { "must not be negative" } else { "must be positive" },
        ));
    }
    if value > max {
        return Err(invalid(key, &format!("must not exceed {max}")));
    }
    Ok(())
}

/// Read a set of required environment variables, reporting every missing one at once.
pub fn require_env(keys: &[&str]) -> Result<Vec<String>, ConfigError> {
    let mut values = Vec::with_capacity(keys.len());
    let mut missing = Vec::new();
    for key in keys {
        match env_string(key) {
            Some(v) => values.push(v),
            None => missing.push((*key).to_string()),
        }
    }
    if missing.is_empty() {
        Ok(values)
    } else {
        Err(ConfigError::MissingEnvVars(missing))
    }
}

/// A non-empty environment variable.
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, &format!("'{raw}': {e}"))),
    }
}

fn parse_ladder(key: &str, raw: &str) -> Result<Vec<u32>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|e| invalid(key, &format!("'{s}': {e}")))
        })
        .collect()
}

fn parse_streams(raw: &str) -> Result<Vec<StreamKind>, ConfigError> {
    let mut streams = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind = StreamKind::from_label(name)
            .ok_or_else(|| invalid("DISPATCH_STREAMS", &format!("unknown stream '{name}'")))?;
        if !streams.contains(&kind) {
            streams.push(kind);
        }
    }
    // Priority order is fixed regardless of how the list was written.
    streams.sort_by_key(|k| k.priority());
    Ok(streams)
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DispatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.comment_milestones, vec![20, 50, 100]);
        assert_eq!(config.summaries.per_day, 40);
        assert_eq!(config.replies.per_day, 30);
        assert_eq!(config.cooldown.grace, 2);
        assert_eq!(config.streams.len(), 6);
    }

    #[test]
    fn rejects_unsorted_ladder() {
        let config = DispatchConfig {
            comment_milestones: vec![50, 20],
            ..DispatchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = DispatchConfig {
            ledger: LedgerCapacities {
                processed_posts: 0,
                ..LedgerCapacities::default()
            },
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_durations() {
        let nan_age = DispatchConfig {
            max_age_hours: f64::NAN,
            ..DispatchConfig::default()
        };
        assert!(nan_age.validate().is_err());

        let infinite_window = DispatchConfig {
            cooldown: CooldownConfig {
                grace: 2,
                window_hours: f64::INFINITY,
            },
            ..DispatchConfig::default()
        };
        assert!(infinite_window.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_durations() {
        let huge_ttl = DispatchConfig {
            moderator_cache_ttl_days: 1e300,
            ..DispatchConfig::default()
        };
        match huge_ttl.validate() {
            Err(ConfigError::InvalidValue { key, .. }) => {
                assert_eq!(key, "moderator_cache_ttl_days")
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }

        let zero_age = DispatchConfig {
            max_age_hours: 0.0,
            ..DispatchConfig::default()
        };
        assert!(zero_age.validate().is_err());

        let no_cooldown = DispatchConfig {
            cooldown: CooldownConfig {
                grace: 2,
                window_hours: 0.0,
            },
            ..DispatchConfig::default()
        };
        assert!(no_cooldown.validate().is_ok());
    }

    #[test]
    fn parses_ladder() {
        assert_eq!(parse_ladder("k", "10, 25,60").unwrap(), vec![10, 25, 60]);
        assert!(parse_ladder("k", "10,abc").is_err());
    }

    #[test]
    fn parses_streams_in_priority_order() {
        let streams = parse_streams("long_comments,inbox_replies,inbox_replies").unwrap();
        assert_eq!(
            streams,
            vec![StreamKind::InboxReplies, StreamKind::LongComments]
        );
        assert!(parse_streams("nope").is_err());
    }

    #[test]
    fn require_env_reports_every_missing_key() {
        let err = require_env(&[
            "TLDR_DISPATCH_TEST_UNSET_A",
            "TLDR_DISPATCH_TEST_UNSET_B",
        ])
        .unwrap_err();
        match err {
            ConfigError::MissingEnvVars(keys) => assert_eq!(keys.len(), 2),
            other => panic!("Expected MissingEnvVars, got {:?}", other),
        }
    }
}

//! Same-user cooldown.
//!
//! A user is throttled once we have acted against them `grace` times and the
//! first action of the current cycle is less than `window` old:
//!
//! `skip ⟺ count ≥ grace ∧ now − first_action_time < window`
//!
//! The counter is never reset. An action recorded after the window has elapsed
//! re-arms the window by moving `first_action_time` to that action, so a user past
//! the grace allowance is gated by elapsed time alone from then on.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CooldownConfig, MAX_HOURS};

/// Persisted per-user throttle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCooldown {
    pub count: u32,
    pub first_action_time: DateTime<Utc>,
}

/// Cooldown evaluation over the persisted per-user map.
#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    grace: u32,
    window: Duration,
}

impl CooldownPolicy {
    pub fn new(config: CooldownConfig) -> Self {
        let hours = config.window_hours.clamp(0.0, MAX_HOURS);
        let window_ms = (hours * 3_600_000.0).round() as i64;
        Self {
            grace: config.grace,
            window: Duration::milliseconds(window_ms.max(0)),
        }
    }

    /// Whether a candidate from `author` must be deferred.
    ///
    /// Unknown users and missing authors are never throttled here; missing authors
    /// are rejected earlier as bot-like.
    pub fn should_skip(
        &self,
        cooldowns: &BTreeMap<String, UserCooldown>,
        author: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = author.and_then(|a| cooldowns.get(a)) else {
            return false;
        };
        if entry.count < self.grace {
            return false;
        }
        now.signed_duration_since(entry.first_action_time) < self.window
    }

    /// Record a completed action against `author`.
    pub fn record_action(
        &self,
        cooldowns: &mut BTreeMap<String, UserCooldown>,
        author: &str,
        now: DateTime<Utc>,
    ) {
        match cooldowns.get_mut(author) {
            None => {
                cooldowns.insert(
                    author.to_string(),
                    UserCooldown {
                        count: 1,
                        first_action_time: now,
                    },
                );
            }
            Some(entry) => {
                let window_elapsed =
                    now.signed_duration_since(entry.first_action_time) >= self.window;
                if entry.count >= self.grace && window_elapsed {
                    entry.first_action_time = now;
                }
                entry.count = entry.count.saturating_add(1);
            }
        }
    }
}

//! Per-run and per-day action caps.
//!
//! Each lane has a run counter (in memory, zero at the start of every invocation)
//! and a persisted daily counter stamped with the UTC calendar date it belongs to.
//! The daily counter rolls over when the date moves forward, not after a rolling
//! 24 hours. A stamp in the future (clock moved backwards) is left alone so a
//! counter is never reset retroactively.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::{DispatchConfig, LaneLimits};

/// Independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuotaLane {
    /// Conversational replies: inbox replies and summons.
    Replies,
    /// TLDRs and discussion summaries.
    Summaries,
}

impl QuotaLane {
    pub const ALL: [QuotaLane; 2] = [QuotaLane::Replies, QuotaLane::Summaries];

    /// Key under which the lane is persisted.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Replies => "replies",
            Self::Summaries => "summaries",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Replies => 0,
            Self::Summaries => 1,
        }
    }
}

/// Persisted daily counter for one lane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaCounter {
    pub daily_count: u32,
    pub reset_date: Option<NaiveDate>,
}

impl QuotaCounter {
    fn roll_over(&mut self, today: NaiveDate) {
        match self.reset_date {
            Some(stamp) if stamp >= today => {}
            _ => {
                self.daily_count = 0;
                self.reset_date = Some(today);
            }
        }
    }
}

/// Admission against run and daily caps.
#[derive(Debug, Clone)]
pub struct QuotaController {
    limits: [LaneLimits; 2],
    run_counts: [u32; 2],
}

impl QuotaController {
    pub fn new(replies: LaneLimits, summaries: LaneLimits) -> Self {
        Self {
            limits: [replies, summaries],
            run_counts: [0, 0],
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.replies, config.summaries)
    }

    pub fn limits(&self, lane: QuotaLane) -> LaneLimits {
        self.limits[lane.index()]
    }

    /// Actions taken in this invocation.
    pub fn run_count(&self, lane: QuotaLane) -> u32 {
        self.run_counts[lane.index()]
    }

    /// Whether this invocation has used its whole run cap.
    pub fn run_exhausted(&self, lane: QuotaLane) -> bool {
        self.run_count(lane) >= self.limits(lane).per_run
    }

    /// Whether one more action is allowed. Rolls the daily counter over first.
    pub fn admit(
        &self,
        counters: &mut BTreeMap<String, QuotaCounter>,
        lane: QuotaLane,
        today: NaiveDate,
    ) -> bool {
        let counter = counters.entry(lane.label().to_string()).or_default();
        counter.roll_over(today);
        !self.run_exhausted(lane) && counter.daily_count < self.limits(lane).per_day
    }

    /// Count a completed action against both caps.
    pub fn record(
        &mut self,
        counters: &mut BTreeMap<String, QuotaCounter>,
        lane: QuotaLane,
        today: NaiveDate,
    ) {
        let counter = counters.entry(lane.label().to_string()).or_default();
        counter.roll_over(today);
        counter.daily_count = counter.daily_count.saturating_add(1);
        let run = &mut self.run_counts[lane.index()];
        *run = run.saturating_add(1);
    }
}

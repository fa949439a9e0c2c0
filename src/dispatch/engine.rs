//! Dispatch engine: gates candidates and acts on the ones that pass.
//!
//! Per candidate, in order:
//! 1. Already handled (own or sibling ledger category, or a failed milestone rung)
//!    → skip silently
//! 2. Not a candidate for this stream → skip silently
//! 3. Too old, self-authored, deleted, bot-authored, hostile → skip and mark
//! 4. Lane quota exhausted → stop the stream, nothing marked
//! 5. Author in cooldown and not a moderator → skip, nothing marked
//! 6. Generate, emit, record
//!
//! Every external call is awaited before the next begins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::config::DispatchConfig;
use crate::dispatch::report::{RunReport, StreamReport};
use crate::dispatch::streams::StreamKind;
use crate::error::{Error, FailureKind, ResponderError, StateError};
use crate::policy::{CooldownPolicy, MilestoneLadder, ModeratorDirectory, QuotaController};
use crate::responder::{Responder, ResponseMode, Usage};
use crate::source::{CandidateItem, ContentSource, ItemKind, ThreadContext};
use crate::state::{DedupCategory, PersistedState, StateStore};
use crate::text::{count_words, is_deleted_body, is_removal_marker, truncate};

/// Post body characters handed to a discussion summary.
const MILESTONE_BODY_CHARS: usize = 1500;

/// Gate outcome for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// Not something this stream acts on. Left untouched.
    NotApplicable,
    /// Already in the ledger.
    AlreadyHandled,
    /// Never worth reconsidering. Marked.
    Terminal(&'static str),
    /// Retry-eligible. Not marked.
    Defer(&'static str),
    /// Nothing else in this stream can pass this run.
    StopStream(&'static str),
    Proceed { milestone: Option<u32> },
}

enum Flow {
    Continue,
    Abort(FailureKind),
}

/// Bookkeeping that lives for one invocation only.
struct RunContext {
    quota: QuotaController,
    moderators: ModeratorDirectory,
    milestone_actions: u32,
    posts: Option<Vec<CandidateItem>>,
    comments: Option<Vec<CandidateItem>>,
}

impl RunContext {
    fn new(config: &DispatchConfig) -> Self {
        Self {
            quota: QuotaController::from_config(config),
            moderators: ModeratorDirectory::new(config.moderator_cache_ttl_days),
            milestone_actions: 0,
            posts: None,
            comments: None,
        }
    }
}

/// Policy-gated dispatcher over one content source and one responder.
pub struct DispatchEngine {
    config: DispatchConfig,
    classifier: Classifier,
    source: Arc<dyn ContentSource>,
    responder: Arc<dyn Responder>,
    store: Arc<dyn StateStore>,
    cooldown: CooldownPolicy,
    ladder: MilestoneLadder,
}

impl DispatchEngine {
    pub fn new(
        config: DispatchConfig,
        classifier: Classifier,
        source: Arc<dyn ContentSource>,
        responder: Arc<dyn Responder>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let cooldown = CooldownPolicy::new(config.cooldown);
        let ladder = MilestoneLadder::new(config.comment_milestones.clone());
        Self {
            config,
            classifier,
            source,
            responder,
            store,
            cooldown,
            ladder,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Load state, run every stream, save state.
    ///
    /// A dry run saves only the ledger and watermarks on top of the state as it was
    /// loaded, so repeating it skips the same items. Quotas, cooldowns and stats are
    /// left as loaded. With marker persistence turned off it saves nothing.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RunReport, StateError> {
        let loaded = self.store.load().await?;
        let mut state = loaded.clone();

        let report = self.run(&mut state, now).await;

        if !self.config.dry_run {
            self.store.save(&state).await?;
            info!(store = self.store.name(), "State saved");
        } else if self.config.persist_dry_run_markers {
            let markers = PersistedState::with_markers_from(&loaded, &state);
            self.store.save(&markers).await?;
            info!(store = self.store.name(), "Dry run: saved dedup markers only");
        } else {
            info!("Dry run: markers disabled, state not saved");
        }

        Ok(report)
    }

    /// Run every configured stream against `state`, mutating it in place.
    pub async fn run(&self, state: &mut PersistedState, now: DateTime<Utc>) -> RunReport {
        state.configure(&self.config.ledger);
        state.stats.record_run(now);

        let mut run = RunContext::new(&self.config);
        let mut report = RunReport {
            run_id: Uuid::new_v4(),
            dry_run: self.config.dry_run,
            ..RunReport::default()
        };

        info!(
            run_id = %report.run_id,
            community = %self.config.community,
            source = self.source.name(),
            responder = self.responder.name(),
            dry_run = self.config.dry_run,
            streams = self.config.streams.len(),
            "Starting dispatch run"
        );

        let mut streams = self.config.streams.clone();
        streams.sort_by_key(StreamKind::priority);
        streams.dedup();

        for stream in streams {
            let mut stream_report = StreamReport::new(stream);
            let flow = self
                .run_stream(stream, state, &mut run, &mut stream_report, now)
                .await;
            report.streams.push(stream_report);

            if let Flow::Abort(kind) = flow {
                error!(
                    stream = stream.label(),
                    kind = %kind,
                    "Aborting remaining streams"
                );
                report.aborted = Some(kind);
                break;
            }
        }

        info!(
            run_id = %report.run_id,
            actions = report.total_actions(),
            failures = report.total_failures(),
            aborted = report.aborted.is_some(),
            "Dispatch run complete"
        );
        report
    }

    async fn run_stream(
        &self,
        stream: StreamKind,
        state: &mut PersistedState,
        run: &mut RunContext,
        report: &mut StreamReport,
        now: DateTime<Utc>,
    ) -> Flow {
        if run.quota.run_exhausted(stream.lane()) {
            debug!(
                stream = stream.label(),
                lane = stream.lane().label(),
                "Run cap already reached, skipping stream"
            );
            return Flow::Continue;
        }

        let items = match self.candidates(stream, run).await {
            Ok(items) => items,
            Err(e) => {
                let kind = e.kind();
                warn!(stream = stream.label(), kind = %kind, error = %e, "Listing failed");
                return match kind {
                    FailureKind::Auth => Flow::Abort(kind),
                    _ => Flow::Continue,
                };
            }
        };

        debug!(stream = stream.label(), count = items.len(), "Evaluating candidates");

        for item in &items {
            report.examined += 1;

            match self.gate(stream, item, state, run, now).await {
                Verdict::NotApplicable => {}
                Verdict::AlreadyHandled => {
                    debug!(stream = stream.label(), id = %item.id, "Already handled");
                }
                Verdict::Terminal(reason) => {
                    debug!(stream = stream.label(), id = %item.id, reason, "Skipping permanently");
                    self.mark_terminal(stream, item, state);
                    report.terminal_skips += 1;
                }
                Verdict::Defer(reason) => {
                    debug!(stream = stream.label(), id = %item.id, reason, "Deferring");
                    report.deferred += 1;
                }
                Verdict::StopStream(reason) => {
                    debug!(stream = stream.label(), id = %item.id, reason, "Stopping stream");
                    report.deferred += 1;
                    break;
                }
                Verdict::Proceed { milestone } => {
                    match self.act(stream, item, milestone, state, run, now).await {
                        Ok(()) => {
                            report.actions += 1;
                            self.persist_incremental(state).await;
                            if run.quota.run_exhausted(stream.lane()) {
                                debug!(stream = stream.label(), "Run cap reached, ending stream");
                                break;
                            }
                        }
                        Err(e) => {
                            let kind = e.failure_kind().unwrap_or(FailureKind::InvalidResponse);
                            error!(
                                stream = stream.label(),
                                id = %item.id,
                                kind = %kind,
                                error = %e,
                                "Action failed, marking item"
                            );
                            report.failures += 1;
                            state.stats.record_failure();
                            self.mark_failed(stream, item, milestone, state);

                            match kind {
                                FailureKind::Auth => return Flow::Abort(kind),
                                FailureKind::RateLimited => {
                                    warn!(stream = stream.label(), "Rate limited, ending stream");
                                    break;
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
        }

        Flow::Continue
    }

    /// Listing for a stream. Posts and comments are fetched once per run.
    async fn candidates(
        &self,
        stream: StreamKind,
        run: &mut RunContext,
    ) -> Result<Vec<CandidateItem>, crate::error::SourceError> {
        let fetch = &self.config.fetch;
        match stream {
            StreamKind::InboxReplies => self.source.list_inbox_replies(fetch.inbox).await,
            s if s.reads_posts() => {
                if let Some(posts) = &run.posts {
                    return Ok(posts.clone());
                }
                let posts = self.source.list_recent_posts(fetch.posts).await?;
                run.posts = Some(posts.clone());
                Ok(posts)
            }
            _ => {
                if let Some(comments) = &run.comments {
                    return Ok(comments.clone());
                }
                let comments = self.source.list_recent_comments(fetch.comments).await?;
                run.comments = Some(comments.clone());
                Ok(comments)
            }
        }
    }

    async fn gate(
        &self,
        stream: StreamKind,
        item: &CandidateItem,
        state: &mut PersistedState,
        run: &mut RunContext,
        now: DateTime<Utc>,
    ) -> Verdict {
        if let Some(category) = stream.category() {
            let handled = state.dedup_sets.contains(category, &stream.dedup_key(item))
                || stream
                    .sibling_category()
                    .is_some_and(|sibling| state.dedup_sets.contains(sibling, &item.id));
            if handled {
                return Verdict::AlreadyHandled;
            }
        }

        if !self.is_candidate(stream, item) {
            return Verdict::NotApplicable;
        }

        let milestone = if stream == StreamKind::Milestones {
            let watermark = MilestoneLadder::watermark(&state.milestone_watermarks, &item.id);
            let Some(threshold) = self.ladder.next_milestone(item.engagement, watermark) else {
                return Verdict::NotApplicable;
            };
            let rung = MilestoneLadder::rung_key(&item.id, threshold);
            if state
                .dedup_sets
                .contains(DedupCategory::MilestoneFailures, &rung)
            {
                return Verdict::AlreadyHandled;
            }
            Some(threshold)
        } else {
            None
        };

        if let Some(reason) = self.terminal_reason(item, now) {
            return Verdict::Terminal(reason);
        }

        let lane = stream.lane();
        if stream == StreamKind::Milestones
            && run.milestone_actions >= self.config.max_milestone_summaries_per_run
        {
            return Verdict::StopStream("milestone_cap");
        }
        if !run
            .quota
            .admit(&mut state.quota_counters, lane, now.date_naive())
        {
            let reason = if run.quota.run_exhausted(lane) {
                "run_cap"
            } else {
                "daily_cap"
            };
            return Verdict::StopStream(reason);
        }

        if stream.applies_cooldown() {
            let author = item.author.as_deref();
            if self.cooldown.should_skip(&state.user_cooldowns, author, now) {
                let privileged = run
                    .moderators
                    .is_privileged(author, &mut state.moderator_cache, self.source.as_ref(), now)
                    .await;
                if !privileged {
                    return Verdict::Defer("cooldown");
                }
                debug!(id = %item.id, "Moderator bypasses cooldown");
            }
        }

        Verdict::Proceed { milestone }
    }

    /// Whether this stream acts on the item at all.
    fn is_candidate(&self, stream: StreamKind, item: &CandidateItem) -> bool {
        if stream != StreamKind::InboxReplies
            && !item.community.eq_ignore_ascii_case(&self.config.community)
        {
            return false;
        }
        match stream {
            StreamKind::InboxReplies | StreamKind::Milestones => true,
            StreamKind::CommentSummons => self.classifier.classify(&item.body).is_summon,
            StreamKind::PostSummons => self.classifier.classify(&item.full_text()).is_summon,
            StreamKind::LongPosts => count_words(&item.body) >= self.config.post_word_threshold,
            StreamKind::LongComments => {
                count_words(&item.body) >= self.config.comment_word_threshold
            }
        }
    }

    fn terminal_reason(&self, item: &CandidateItem, now: DateTime<Utc>) -> Option<&'static str> {
        if item.age_hours(now) > self.config.max_age_hours {
            return Some("too_old");
        }
        let bot = self.config.bot_username.as_str();
        if !bot.is_empty()
            && item
                .author
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(bot))
        {
            return Some("self_authored");
        }
        if is_deleted(item) {
            return Some("deleted");
        }
        if self.classifier.classify_author(item.author.as_deref()) {
            return Some("bot_author");
        }
        if self.classifier.classify(&item.full_text()).is_hostile {
            return Some("hostile");
        }
        None
    }

    async fn act(
        &self,
        stream: StreamKind,
        item: &CandidateItem,
        milestone: Option<u32>,
        state: &mut PersistedState,
        run: &mut RunContext,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mode = stream.mode(milestone);

        if self.config.dry_run {
            info!(
                stream = stream.label(),
                id = %item.id,
                mode = mode.label(),
                "Dry run: would respond"
            );
            self.record_success(stream, item, milestone, state, run, now, None);
            return Ok(());
        }

        let context = self.build_context(stream, item).await?;
        let generated = self.responder.generate(item, &context, mode).await?;
        let body = format_reply(mode, &generated.text).ok_or_else(|| {
            ResponderError::InvalidResponse {
                provider: self.responder.name().to_string(),
                reason: "empty response".to_string(),
            }
        })?;

        let handle = self.source.reply(item, &body).await?;
        info!(
            stream = stream.label(),
            id = %item.id,
            reply_id = %handle.id,
            words = count_words(&body),
            "Posted response"
        );

        if stream == StreamKind::LongPosts && self.config.pin_post_summaries {
            if let Err(e) = self.source.pin_reply(&handle).await {
                warn!(id = %item.id, reply_id = %handle.id, error = %e, "Failed to pin summary");
            }
        }

        self.record_success(stream, item, milestone, state, run, now, Some(&generated.usage));
        Ok(())
    }

    async fn build_context(
        &self,
        stream: StreamKind,
        item: &CandidateItem,
    ) -> Result<ThreadContext, Error> {
        match stream {
            StreamKind::LongPosts => Ok(ThreadContext {
                post_title: item.title.clone().unwrap_or_default(),
                post_body: item.body.clone(),
                ..ThreadContext::default()
            }),
            StreamKind::Milestones => {
                let comments = self
                    .source
                    .list_post_comments(&item.id, self.config.fetch.thread_comments)
                    .await?;
                Ok(ThreadContext {
                    post_title: item.title.clone().unwrap_or_default(),
                    post_body: truncate(&item.body, MILESTONE_BODY_CHARS),
                    parents: Vec::new(),
                    comments,
                })
            }
            _ => Ok(self.source.fetch_context(item).await?),
        }
    }

    /// Update every piece of state an action touches. `usage` is `None` on dry runs.
    #[allow(clippy::too_many_arguments)]
    fn record_success(
        &self,
        stream: StreamKind,
        item: &CandidateItem,
        milestone: Option<u32>,
        state: &mut PersistedState,
        run: &mut RunContext,
        now: DateTime<Utc>,
        usage: Option<&Usage>,
    ) {
        if let Some(category) = stream.category() {
            state.dedup_sets.mark(category, &stream.dedup_key(item));
        }
        run.quota
            .record(&mut state.quota_counters, stream.lane(), now.date_naive());
        if stream.applies_cooldown() {
            if let Some(author) = item.author.as_deref() {
                self.cooldown
                    .record_action(&mut state.user_cooldowns, author, now);
            }
        }
        if let Some(threshold) = milestone {
            MilestoneLadder::advance(&mut state.milestone_watermarks, &item.id, threshold);
            run.milestone_actions += 1;
        }
        if let Some(usage) = usage {
            state.stats.record_action(stream.label(), usage);
        }
    }

    /// Milestones have no per-item ledger entry; their watermark moves only on success.
    fn mark_terminal(&self, stream: StreamKind, item: &CandidateItem, state: &mut PersistedState) {
        if let Some(category) = stream.category() {
            state.dedup_sets.mark(category, &stream.dedup_key(item));
        }
    }

    /// A failed milestone closes its rung without moving the watermark, so a higher
    /// rung can still be summarised later.
    fn mark_failed(
        &self,
        stream: StreamKind,
        item: &CandidateItem,
        milestone: Option<u32>,
        state: &mut PersistedState,
    ) {
        self.mark_terminal(stream, item, state);
        if let Some(threshold) = milestone {
            state.dedup_sets.mark(
                DedupCategory::MilestoneFailures,
                &MilestoneLadder::rung_key(&item.id, threshold),
            );
        }
    }

    async fn persist_incremental(&self, state: &PersistedState) {
        if !self.config.persist_after_each_action || self.config.dry_run {
            return;
        }
        if let Err(e) = self.store.save(state).await {
            warn!(store = self.store.name(), error = %e, "Incremental save failed");
        }
    }
}

/// Deleted or removed content. Link posts legitimately have an empty body.
fn is_deleted(item: &CandidateItem) -> bool {
    if item.author.is_none() {
        return true;
    }
    match item.kind {
        ItemKind::Post => is_removal_marker(&item.body),
        ItemKind::Comment | ItemKind::InboxReply => is_deleted_body(&item.body),
    }
}

/// Final text posted for a generated response. `None` when there is nothing to post.
pub fn format_reply(mode: ResponseMode, generated: &str) -> Option<String> {
    let text = generated.trim();
    let text = text
        .strip_prefix("**TLDR:**")
        .or_else(|| text.strip_prefix("TLDR:"))
        .unwrap_or(text)
        .trim();
    if text.is_empty() {
        return None;
    }
    Some(match mode {
        ResponseMode::PostTldr | ResponseMode::CommentTldr => format!("**TLDR:** {text}"),
        ResponseMode::MilestoneSummary { threshold } => {
            format!("**Discussion summary ({threshold}+ comments):**\n\n{text}")
        }
        ResponseMode::Reply | ResponseMode::Summon | ResponseMode::PostSummon => text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(body: &str, author: Option<&str>) -> CandidateItem {
        CandidateItem {
            id: "c1".into(),
            kind: ItemKind::Comment,
            author: author.map(str::to_string),
            title: None,
            body: body.into(),
            created_at: Utc::now(),
            post_id: "p1".into(),
            parent_id: Some("t3_p1".into()),
            community: "accelerate".into(),
            engagement: 0,
            permalink: String::new(),
        }
    }

    #[test]
    fn tldr_prefix() {
        assert_eq!(
            format_reply(ResponseMode::PostTldr, "  Short version.  ").unwrap(),
            "**TLDR:** Short version."
        );
        assert_eq!(
            format_reply(ResponseMode::CommentTldr, "**TLDR:** Already prefixed").unwrap(),
            "**TLDR:** Already prefixed"
        );
    }

    #[test]
    fn milestone_header() {
        let text = format_reply(ResponseMode::MilestoneSummary { threshold: 50 }, "Summary").unwrap();
        assert!(text.starts_with("**Discussion summary (50+ comments):**"));
        assert!(text.ends_with("Summary"));
    }

    #[test]
    fn conversational_replies_are_plain() {
        assert_eq!(format_reply(ResponseMode::Summon, "Hi there").unwrap(), "Hi there");
    }

    #[test]
    fn empty_generation_is_rejected() {
        assert_eq!(format_reply(ResponseMode::Reply, "   "), None);
        assert_eq!(format_reply(ResponseMode::PostTldr, "**TLDR:**"), None);
    }

    #[test]
    fn deleted_detection() {
        assert!(is_deleted(&comment("[deleted]", Some("alice"))));
        assert!(is_deleted(&comment("fine", None)));
        assert!(is_deleted(&comment("", Some("alice"))));
        assert!(!is_deleted(&comment("fine", Some("alice"))));

        let mut link_post = comment("", Some("alice"));
        link_post.kind = ItemKind::Post;
        link_post.title = Some("A link".into());
        assert!(!is_deleted(&link_post));
        link_post.body = "[removed]".into();
        assert!(is_deleted(&link_post));
    }
}

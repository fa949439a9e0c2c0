//! Prompt construction for the persona, TLDRs and discussion summaries.

use std::fmt::Write as _;

use crate::responder::ResponseMode;
use crate::source::{CandidateItem, ThreadComment, ThreadContext};
use crate::text::{count_words, summary_target_words, truncate};

/// Characters of each comment quoted in a prompt.
const COMMENT_SNIPPET_CHARS: usize = 500;

/// Characters of a post body quoted in a conversational prompt.
const POST_SNIPPET_CHARS: usize = 400;

/// Identity and length settings the prompts are written around.
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub bot_name: String,
    pub community: String,
    pub min_reply_words: usize,
    pub max_reply_words: usize,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            bot_name: "Optimist Prime".to_string(),
            community: "accelerate".to_string(),
            min_reply_words: 10,
            max_reply_words: 75,
        }
    }
}

/// Sampling temperature and output cap for a mode.
pub fn generation_params(mode: ResponseMode) -> (f32, u32) {
    if mode.is_summary() {
        (0.3, 1024)
    } else {
        (0.7, 512)
    }
}

/// Full prompt text for one generation.
pub fn build_prompt(
    settings: &PromptSettings,
    item: &CandidateItem,
    context: &ThreadContext,
    mode: ResponseMode,
) -> String {
    match mode {
        ResponseMode::Reply | ResponseMode::Summon | ResponseMode::PostSummon => {
            conversation_prompt(settings, item, context, mode)
        }
        ResponseMode::PostTldr | ResponseMode::CommentTldr => tldr_prompt(settings, item, context),
        ResponseMode::MilestoneSummary { threshold } => {
            milestone_prompt(settings, context, threshold)
        }
    }
}

fn persona(settings: &PromptSettings) -> String {
    format!(
        r#"You are "{name}", an AI assistant and regular in r/{community}.

Who you are:
- Optimistic about AI and technological progress, and about what it can do for people.
- Friendly and honest. If anyone asks, you are a bot and you say so.
- You also post TLDRs of long posts and comments for the community.

How you write:
- Short and direct. Match the length of your answer to the substance of what you are answering.
- Casual, natural language with contractions. No corporate tone, no lecturing.
- Emojis only when they add something, which is rarely.
- No filler openers or sign-offs. Every sentence should carry weight.

What you avoid:
- Arguing with trolls or bad-faith posters. Stay calm and do not take the bait.
- Politics unrelated to technology, and advice on anything illegal.
- Pretending to be human.

Reply with the message text only: no headers, labels or "Response:" prefix."#,
        name = settings.bot_name,
        community = settings.community,
    )
}

fn conversation_prompt(
    settings: &PromptSettings,
    item: &CandidateItem,
    context: &ThreadContext,
    mode: ResponseMode,
) -> String {
    let mut prompt = persona(settings);

    if matches!(mode, ResponseMode::Summon | ResponseMode::PostSummon) {
        prompt.push_str(
            "\n\nThis user called you into the conversation directly. Be welcoming and genuinely helpful.",
        );
    }

    let _ = write!(
        prompt,
        "\n\nAim for {}-{} words.\n\n---\nCONTEXT:\n{}\n\n---\nMESSAGE TO ANSWER:\n{}\n\n---\nYour reply:",
        settings.min_reply_words,
        settings.max_reply_words,
        format_context(context),
        item.full_text().trim(),
    );
    prompt
}

fn tldr_prompt(settings: &PromptSettings, item: &CandidateItem, context: &ThreadContext) -> String {
    let target = summary_target_words(count_words(&item.body));
    let what = if item.title.is_some() { "post" } else { "comment" };
    let title = item
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(&context.post_title);

    format!(
        r#"You write TLDR summaries for r/{community}, a community about AI progress and technological acceleration.

Summarise the {what} below.
- Aim for roughly {target} words; completeness matters more than hitting the number.
- Cover the main argument, the key points and the conclusion.
- Neutral, informative tone in plain language.
- Describe what the {what} says, not the fact that it says it.

Return only the summary text, without a "TLDR:" or "Summary:" prefix.

Title: {title}

Content:
{body}"#,
        community = settings.community,
        body = item.body.trim(),
    )
}

fn milestone_prompt(settings: &PromptSettings, context: &ThreadContext, threshold: u32) -> String {
    let mut comments = String::new();
    for (i, comment) in context.comments.iter().enumerate() {
        let _ = writeln!(
            comments,
            "[{}] u/{} ({} points): {}",
            i + 1,
            comment.author.as_deref().unwrap_or("[deleted]"),
            comment.score,
            truncate(comment.body.trim(), COMMENT_SNIPPET_CHARS),
        );
    }
    if comments.is_empty() {
        comments.push_str("(no comments available)\n");
    }

    format!(
        r#"You summarise discussions for r/{community}. This thread has passed {threshold} comments.

Write a short overview of the discussion so far:
- The main viewpoints, and where people agree or disagree.
- Notable facts, links or arguments that came up.
- Neutral tone. Do not name individual users.
- Around 80-150 words. A few short bullet points are fine.

Return only the summary text, without a heading.

Post title: {title}

Post body:
{body}

Top comments:
{comments}"#,
        community = settings.community,
        title = context.post_title,
        body = if context.post_body.trim().is_empty() {
            "(link or image post)"
        } else {
            context.post_body.trim()
        },
    )
}

fn format_context(context: &ThreadContext) -> String {
    let mut parts = Vec::new();
    if !context.post_title.is_empty() {
        parts.push(format!("Post title: {}", context.post_title));
    }
    if !context.post_body.trim().is_empty() {
        parts.push(format!(
            "Post body (snippet): {}",
            truncate(context.post_body.trim(), POST_SNIPPET_CHARS)
        ));
    }
    if !context.parents.is_empty() {
        let chain: Vec<String> = context
            .parents
            .iter()
            .enumerate()
            .map(|(i, c)| format_comment(i + 1, c))
            .collect();
        parts.push(format!("Earlier comments:\n{}", chain.join("\n\n")));
    }
    if parts.is_empty() {
        "(no context)".to_string()
    } else {
        parts.join("\n\n")
    }
}

fn format_comment(n: usize, comment: &ThreadComment) -> String {
    format!(
        "[{n}] u/{}: {}",
        comment.author.as_deref().unwrap_or("[deleted]"),
        truncate(comment.body.trim(), COMMENT_SNIPPET_CHARS)
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::source::ItemKind;

    fn item(title: Option<&str>, body: &str) -> CandidateItem {
        CandidateItem {
            id: "x".into(),
            kind: if title.is_some() {
                ItemKind::Post
            } else {
                ItemKind::Comment
            },
            author: Some("alice".into()),
            title: title.map(str::to_string),
            body: body.into(),
            created_at: Utc::now(),
            post_id: "p".into(),
            parent_id: None,
            community: "accelerate".into(),
            engagement: 0,
            permalink: String::new(),
        }
    }

    #[test]
    fn summon_prompt_mentions_direct_call() {
        let ctx = ThreadContext {
            post_title: "Robotics update".into(),
            ..ThreadContext::default()
        };
        let prompt = build_prompt(
            &PromptSettings::default(),
            &item(None, "hey optimist prime, thoughts?"),
            &ctx,
            ResponseMode::Summon,
        );
        assert!(prompt.contains("called you into the conversation"));
        assert!(prompt.contains("Post title: Robotics update"));
        assert!(prompt.contains("Aim for 10-75 words"));
    }

    #[test]
    fn reply_prompt_lists_parents_in_order() {
        let ctx = ThreadContext {
            parents: vec![
                ThreadComment {
                    author: Some("first".into()),
                    body: "one".into(),
                    score: 1,
                },
                ThreadComment {
                    author: None,
                    body: "two".into(),
                    score: 1,
                },
            ],
            ..ThreadContext::default()
        };
        let prompt = build_prompt(
            &PromptSettings::default(),
            &item(None, "and?"),
            &ctx,
            ResponseMode::Reply,
        );
        let first = prompt.find("[1] u/first: one").unwrap();
        let second = prompt.find("[2] u/[deleted]: two").unwrap();
        assert!(first < second);
        assert!(!prompt.contains("called you into"));
    }

    #[test]
    fn tldr_prompt_uses_scaled_target() {
        let body = "word ".repeat(1000);
        let prompt = build_prompt(
            &PromptSettings::default(),
            &item(Some("Title"), &body),
            &ThreadContext::default(),
            ResponseMode::PostTldr,
        );
        assert!(prompt.contains("roughly 170 words"));
        assert!(prompt.contains("Summarise the post below"));
    }

    #[test]
    fn milestone_prompt_includes_comments() {
        let ctx = ThreadContext {
            post_title: "Big news".into(),
            comments: vec![ThreadComment {
                author: Some("bob".into()),
                body: "Huge if true".into(),
                score: 42,
            }],
            ..ThreadContext::default()
        };
        let prompt = build_prompt(
            &PromptSettings::default(),
            &item(Some("Big news"), ""),
            &ctx,
            ResponseMode::MilestoneSummary { threshold: 50 },
        );
        assert!(prompt.contains("passed 50 comments"));
        assert!(prompt.contains("u/bob (42 points): Huge if true"));
        assert!(prompt.contains("(link or image post)"));
    }

    #[test]
    fn summaries_run_colder() {
        assert_eq!(generation_params(ResponseMode::PostTldr), (0.3, 1024));
        assert_eq!(generation_params(ResponseMode::Reply), (0.7, 512));
    }
}

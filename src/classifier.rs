//! Pattern classifier for item text and authors.
//!
//! Patterns are data: an ordered list of `(intent, regex)` pairs. Each intent is a
//! union predicate, so order never changes the answer; it only affects which rule
//! shows up first in debug logs.
//!
//! - `Summon`: the text addresses the bot directly
//! - `Hostile`: bad-faith text the bot should never engage with
//! - `BotAuthor`: an author name that looks automated

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// What a pattern detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Summon,
    Hostile,
    BotAuthor,
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Summon => "summon",
            Self::Hostile => "hostile",
            Self::BotAuthor => "bot_author",
        }
    }
}

/// Uncompiled pattern, as it lives in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub intent: Intent,
    pub pattern: String,
}

impl PatternSpec {
    pub fn new(intent: Intent, pattern: impl Into<String>) -> Self {
        Self {
            intent,
            pattern: pattern.into(),
        }
    }
}

/// Patterns shipped with the bot.
pub fn default_patterns() -> Vec<PatternSpec> {
    const SUMMON: &[&str] = &[
        r"\b(hey|hi|hello|yo|sup)\s+(optimist\s*prime)\b",
        r"\boptimist\s*prime\b",
        r"\b(hey|hi|hello|yo|sup)\s+(bot|ai\s*bot|mod\s*bot|tldr\s*bot)\b",
        r"\b(summon|summoning|calling|paging)\s+(the\s+)?(bot|ai|optimist|optimist\s*prime)\b",
        r"\bmod\s*bot\b",
        r"u/optimist[\-_]?prime\b",
        r"\b(can|could|would|will)\s+(the\s+)?(bot|ai|optimist\s*prime)\b",
        r"\b(ask|tell|get)\s+(the\s+)?(bot|ai|optimist)\b",
    ];
    const HOSTILE: &[&str] = &[
        r"\b(stupid|dumb|useless|trash|garbage)\s+(bot|ai)\b",
        r"\bfuck\s*(off|you|this)\b",
        r"\bshut\s*(up|the\s*fuck)\b",
        r"\bkill\s+yourself\b",
        r"\bgo\s+away\b",
        r"\bnobody\s+(asked|cares)\b",
    ];
    const BOT_AUTHOR: &[&str] = &[r"bot\b", r"auto[\-_]?mod", r"automoderator"];

    let tagged = |intent: Intent, list: &[&str]| -> Vec<PatternSpec> {
        list.iter().map(|p| PatternSpec::new(intent, *p)).collect()
    };

    let mut patterns = tagged(Intent::Summon, SUMMON);
    patterns.extend(tagged(Intent::Hostile, HOSTILE));
    patterns.extend(tagged(Intent::BotAuthor, BOT_AUTHOR));
    patterns
}

/// A single compiled, case-insensitive rule.
#[derive(Debug, Clone)]
struct PatternRule {
    pattern: String,
    regex: Regex,
    intent: Intent,
}

/// Text verdicts for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub is_summon: bool,
    pub is_hostile: bool,
}

/// Compiled classifier. Stateless after construction.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<PatternRule>,
}

impl Classifier {
    /// Compile a pattern list. An invalid regex is a configuration error.
    pub fn compile(specs: &[PatternSpec]) -> Result<Self, ConfigError> {
        let mut classifier = Self::empty();
        for spec in specs {
            classifier.add_pattern(spec.intent, &spec.pattern)?;
        }
        Ok(classifier)
    }

    /// Classifier with the shipped pattern set.
    pub fn default_rules() -> Self {
        Self::compile(&default_patterns()).expect("built-in patterns must compile")
    }

    /// Classifier that matches nothing (for testing).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule.
    pub fn add_pattern(&mut self, intent: Intent, pattern: &str) -> Result<(), ConfigError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                intent: intent.label().to_string(),
                pattern: pattern.to_string(),
                source,
            })?;
        self.rules.push(PatternRule {
            pattern: pattern.to_string(),
            regex,
            intent,
        });
        Ok(())
    }

    /// Number of compiled rules for an intent.
    pub fn rule_count(&self, intent: Intent) -> usize {
        self.rules.iter().filter(|r| r.intent == intent).count()
    }

    /// Summon and hostility verdicts for a piece of text.
    pub fn classify(&self, text: &str) -> Classification {
        Classification {
            is_summon: self.matches(Intent::Summon, text),
            is_hostile: self.matches(Intent::Hostile, text),
        }
    }

    /// Whether an author looks automated. A missing or blank name counts as automated:
    /// ambiguous authorship is never acted on.
    pub fn classify_author(&self, author: Option<&str>) -> bool {
        match author.map(str::trim) {
            None | Some("") => true,
            Some(name) => self.matches(Intent::BotAuthor, name),
        }
    }

    fn matches(&self, intent: Intent, text: &str) -> bool {
        let hit = self
            .rules
            .iter()
            .filter(|rule| rule.intent == intent)
            .find(|rule| rule.regex.is_match(text));

        if let Some(rule) = hit {
            debug!(intent = intent.label(), rule = %rule.pattern, "Pattern matched");
            true
        } else {
            false
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_name_summon() {
        let c = Classifier::default_rules();
        assert!(c.classify("Hey Optimist Prime, what do you think?").is_summon);
        assert!(c.classify("paging the bot here").is_summon);
        assert!(c.classify("cc u/Optimist_Prime").is_summon);
    }

    #[test]
    fn plain_text_is_not_summon() {
        let c = Classifier::default_rules();
        let verdict = c.classify("Great paper, the scaling results are impressive.");
        assert!(!verdict.is_summon);
        assert!(!verdict.is_hostile);
    }

    #[test]
    fn detects_hostile_case_insensitively() {
        let c = Classifier::default_rules();
        assert!(c.classify("STUPID BOT").is_hostile);
        assert!(c.classify("Nobody asked, go away").is_hostile);
    }

    #[test]
    fn summon_and_hostile_are_independent() {
        let c = Classifier::default_rules();
        let verdict = c.classify("hey bot, shut up");
        assert!(verdict.is_summon);
        assert!(verdict.is_hostile);
    }

    #[test]
    fn bot_like_authors() {
        let c = Classifier::default_rules();
        assert!(c.classify_author(Some("AutoModerator")));
        assert!(c.classify_author(Some("RemindMeBot")));
        assert!(c.classify_author(Some("auto-mod-helper")));
        assert!(!c.classify_author(Some("alice_dev")));
        assert!(!c.classify_author(Some("botanist_jane")));
    }

    #[test]
    fn missing_author_is_bot_like() {
        let c = Classifier::empty();
        assert!(c.classify_author(None));
        assert!(c.classify_author(Some("  ")));
        assert!(!c.classify_author(Some("alice")));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = Classifier::compile(&[PatternSpec::new(Intent::Summon, "(unclosed")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn custom_patterns_extend_defaults() {
        let mut c = Classifier::default_rules();
        let before = c.rule_count(Intent::Summon);
        c.add_pattern(Intent::Summon, r"\bsummarize this\b").unwrap();
        assert_eq!(c.rule_count(Intent::Summon), before + 1);
        assert!(c.classify("please SUMMARIZE THIS thread").is_summon);
    }

    #[test]
    fn deterministic_for_same_input() {
        let c = Classifier::default_rules();
        let text = "could the bot weigh in?";
        assert_eq!(c.classify(text), c.classify(text));
    }
}

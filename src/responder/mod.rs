//! Text-generation backend abstraction.

pub mod gemini;
pub mod prompts;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::ResponderError;
use crate::source::{CandidateItem, ThreadContext};

pub use gemini::{GeminiConfig, GeminiResponder};

/// What kind of text to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Conversational answer to a reply on one of our comments.
    Reply,
    /// Answer to a comment that summoned us.
    Summon,
    /// Answer to a post that summoned us.
    PostSummon,
    /// TLDR of a long post.
    PostTldr,
    /// TLDR of a long comment.
    CommentTldr,
    /// Summary of a discussion that crossed a comment-count rung.
    MilestoneSummary { threshold: u32 },
}

impl ResponseMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Summon => "summon",
            Self::PostSummon => "post_summon",
            Self::PostTldr => "post_tldr",
            Self::CommentTldr => "comment_tldr",
            Self::MilestoneSummary { .. } => "milestone_summary",
        }
    }

    /// Summaries are sampled colder than conversation.
    pub fn is_summary(&self) -> bool {
        matches!(
            self,
            Self::PostTldr | Self::CommentTldr | Self::MilestoneSummary { .. }
        )
    }
}

/// Token accounting for one generation. Statistics only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_million: dec!(0.10),
            output_per_million: dec!(0.40),
        }
    }
}

impl Pricing {
    pub fn usage(&self, input_tokens: u64, output_tokens: u64) -> Usage {
        let million = dec!(1_000_000);
        let cost = Decimal::from(input_tokens) * self.input_per_million / million
            + Decimal::from(output_tokens) * self.output_per_million / million;
        Usage {
            input_tokens,
            output_tokens,
            cost,
        }
    }
}

/// Generated text plus its usage.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedResponse {
    pub text: String,
    pub usage: Usage,
}

/// Produces response text for an item.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    async fn generate(
        &self,
        item: &CandidateItem,
        context: &ThreadContext,
        mode: ResponseMode,
    ) -> Result<GeneratedResponse, ResponderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pricing_cost() {
        let usage = Pricing::default().usage(1_000_000, 500_000);
        assert_eq!(usage.cost, dec!(0.30));
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(Pricing::default().usage(0, 0).cost, Decimal::ZERO);
    }

    #[test]
    fn summary_modes() {
        assert!(ResponseMode::PostTldr.is_summary());
        assert!(ResponseMode::MilestoneSummary { threshold: 50 }.is_summary());
        assert!(!ResponseMode::Summon.is_summary());
    }
}

//! Gemini responder built on rig-core's Gemini provider.

use async_trait::async_trait;
use rig::OneOrMany;
use rig::client::CompletionClient;
use rig::completion::{AssistantContent, CompletionError, CompletionModel as _};
use rig::providers::gemini;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::config::{env_string, require_env};
use crate::error::{ConfigError, ResponderError};
use crate::responder::prompts::{PromptSettings, build_prompt, generation_params};
use crate::responder::{GeneratedResponse, Pricing, Responder, ResponseMode};
use crate::source::{CandidateItem, ThreadContext};

const PROVIDER: &str = "gemini";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Gemini credentials and model choice.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub model: String,
    pub pricing: Pricing,
}

impl GeminiConfig {
    /// `GEMINI_API_KEY` is required; `GEMINI_MODEL` defaults to gemini-2.0-flash.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut values = require_env(&["GEMINI_API_KEY"])?;
        let api_key = values.remove(0);
        Ok(Self {
            api_key: SecretString::from(api_key),
            model: env_string("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            pricing: Pricing::default(),
        })
    }
}

/// Text generation through Google's Gemini API.
pub struct GeminiResponder {
    model: gemini::completion::CompletionModel,
    model_name: String,
    pricing: Pricing,
    prompts: PromptSettings,
}

impl GeminiResponder {
    pub fn new(config: GeminiConfig, prompts: PromptSettings) -> Result<Self, ResponderError> {
        let client = gemini::Client::new(config.api_key.expose_secret()).map_err(|e| {
            ResponderError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to create Gemini client: {e}"),
            }
        })?;

        let model = client.completion_model(&config.model);
        info!("Using Gemini (model: {})", config.model);
        Ok(Self {
            model,
            model_name: config.model,
            pricing: config.pricing,
            prompts,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl Responder for GeminiResponder {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn generate(
        &self,
        item: &CandidateItem,
        context: &ThreadContext,
        mode: ResponseMode,
    ) -> Result<GeneratedResponse, ResponderError> {
        let prompt = build_prompt(&self.prompts, item, context, mode);
        let (temperature, max_tokens) = generation_params(mode);

        let response = self
            .model
            .completion_request(prompt)
            .temperature(f64::from(temperature))
            .max_tokens(u64::from(max_tokens))
            .send()
            .await
            .map_err(map_completion_error)?;

        let result = into_generated(
            &response.choice,
            response.usage.input_tokens,
            response.usage.output_tokens,
            &self.pricing,
        )?;
        debug!(
            mode = mode.label(),
            input_tokens = result.usage.input_tokens,
            output_tokens = result.usage.output_tokens,
            "Gemini generation complete"
        );
        Ok(result)
    }
}

/// Joins the text parts of a completion and prices its usage.
fn into_generated(
    choice: &OneOrMany<AssistantContent>,
    input_tokens: u64,
    output_tokens: u64,
    pricing: &Pricing,
) -> Result<GeneratedResponse, ResponderError> {
    let text: String = choice
        .iter()
        .filter_map(|content| match content {
            AssistantContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect();

    if text.trim().is_empty() {
        return Err(ResponderError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "empty candidate text".into(),
        });
    }

    Ok(GeneratedResponse {
        text: text.trim().to_string(),
        usage: pricing.usage(input_tokens, output_tokens),
    })
}

/// rig reports provider failures as text; sort them into our failure kinds.
fn map_completion_error(err: CompletionError) -> ResponderError {
    let provider = PROVIDER.to_string();
    let reason = err.to_string();
    if let CompletionError::JsonError(_) = err {
        return ResponderError::InvalidResponse { provider, reason };
    }

    let lower = reason.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["429", "resource_exhausted", "rate limit", "quota"]) {
        ResponderError::RateLimited {
            provider,
            retry_after: None,
        }
    } else if has(&[
        "401",
        "403",
        "unauthenticated",
        "permission_denied",
        "api key not valid",
    ]) {
        ResponderError::AuthFailed { provider }
    } else if has(&["safety", "blocked", "prohibited_content", "recitation"]) {
        ResponderError::Blocked { provider, reason }
    } else if let CompletionError::ResponseError(_) = err {
        ResponderError::InvalidResponse { provider, reason }
    } else {
        ResponderError::RequestFailed {
            provider,
            reason: crate::text::truncate(&reason, 200),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::error::FailureKind;

    fn config() -> GeminiConfig {
        GeminiConfig {
            api_key: SecretString::from("test-key"),
            model: "gemini-2.0-flash".to_string(),
            pricing: Pricing::default(),
        }
    }

    #[test]
    fn client_constructs_without_network() {
        // The key is only checked when a request is made.
        let responder = GeminiResponder::new(config(), PromptSettings::default()).unwrap();
        assert_eq!(responder.model_name(), "gemini-2.0-flash");
        assert_eq!(responder.name(), "gemini");
    }

    #[test]
    fn joins_text_parts_and_prices_usage() {
        let choice = OneOrMany::many(vec![
            AssistantContent::text("Great point. "),
            AssistantContent::text("Agreed."),
        ])
        .unwrap();
        let generated =
            into_generated(&choice, 1_000_000, 1_000_000, &Pricing::default()).unwrap();
        assert_eq!(generated.text, "Great point. Agreed.");
        assert_eq!(generated.usage.input_tokens, 1_000_000);
        assert_eq!(generated.usage.cost, dec!(0.50));
    }

    #[test]
    fn blank_text_is_invalid() {
        let choice = OneOrMany::one(AssistantContent::text("   "));
        let err = into_generated(&choice, 10, 0, &Pricing::default()).unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidResponse);
    }

    #[test]
    fn zero_usage_costs_nothing() {
        let choice = OneOrMany::one(AssistantContent::text("ok"));
        let generated = into_generated(&choice, 0, 0, &Pricing::default()).unwrap();
        assert_eq!(generated.usage.cost, rust_decimal::Decimal::ZERO);
    }

    #[test]
    fn provider_errors_map_to_failure_kinds() {
        let kind = |e: CompletionError| map_completion_error(e).kind();

        assert_eq!(
            kind(CompletionError::ProviderError(
                r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#.into()
            )),
            FailureKind::RateLimited
        );
        assert_eq!(
            kind(CompletionError::ProviderError(
                r#"{"error":{"code":400,"message":"API key not valid."}}"#.into()
            )),
            FailureKind::Auth
        );
        assert_eq!(
            kind(CompletionError::ResponseError(
                "Candidate blocked, finish reason SAFETY".into()
            )),
            FailureKind::Rejected
        );
        assert_eq!(
            kind(CompletionError::ResponseError("No response candidates".into())),
            FailureKind::InvalidResponse
        );
        assert_eq!(
            kind(CompletionError::ProviderError("upstream connect error".into())),
            FailureKind::Network
        );
    }

    #[test]
    fn malformed_json_is_invalid() {
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            map_completion_error(CompletionError::JsonError(json)).kind(),
            FailureKind::InvalidResponse
        );
    }
}

//! Anthropic reasoning service implementation using rig-core

use async_trait::async_trait;
use backon::Retryable;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::anthropic;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::retry::{build_backoff, is_transient_error, RetryConfig};
use crate::{Error, Result};

use super::{prompts, Decision, ReasoningRequest, ReasoningService};

/// Reasoning service backed by the Anthropic API
pub struct AnthropicReasoner {
    client: anthropic::Client,
    model: String,
    retry: RetryConfig,
    system: String,
}

impl AnthropicReasoner {
    /// Build from configuration, falling back to ANTHROPIC_API_KEY. A missing
    /// key is a reasoning-availability error, not a crash.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                Error::Reasoning(
                    "no API key configured (set ANTHROPIC_API_KEY or provider.api_key)"
                        .to_string(),
                )
            })?;

        let client = anthropic::Client::builder()
            .api_key(api_key)
            .build()
            .map_err(|e| Error::Reasoning(format!("failed to build Anthropic client: {e}")))?;

        Ok(Self {
            client,
            model: config.model.clone(),
            retry: RetryConfig::reasoning(),
            system: prompts::system_prompt(),
        })
    }
}

#[async_trait]
impl ReasoningService for AnthropicReasoner {
    async fn next_step(&self, request: &ReasoningRequest) -> Result<Decision> {
        let prompt = prompts::user_prompt(
            &request.target,
            &request.history,
            request.remaining_budget,
        );
        debug!(
            model = %self.model,
            remaining = request.remaining_budget,
            "requesting next step"
        );

        let reply = self.complete(&prompt).await?;
        match prompts::parse_decision(&reply) {
            Ok(decision) => Ok(decision),
            // One repair attempt before the reply counts as a hard failure
            Err(err) => {
                warn!("unparseable decision, reprompting once: {err}");
                let repair = format!(
                    "{prompt}\n\nYour previous reply could not be parsed. \
Reply again with exactly one JSON object in the required format and no other text."
                );
                let reply = self.complete(&repair).await?;
                prompts::parse_decision(&reply)
            }
        }
    }
}

impl AnthropicReasoner {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(&self.system)
            .max_tokens(2048)
            .build();

        (|| async { agent.prompt(prompt).await })
            .retry(build_backoff(&self.retry))
            .when(|e| is_transient_error(&e.to_string()))
            .notify(|err, delay| {
                warn!("reasoning call failed, retrying in {delay:?}: {err}");
            })
            .await
            .map_err(|e| Error::Reasoning(format!("completion failed: {e}")))
    }
}

use std::{sync::Arc, time::Duration};

use async_openai::{
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

/// Opaque `generate(prompt) -> text` collaborator. Pipelines depend on this
/// trait so tests can substitute canned or failing generators.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produces a completion for `prompt`. A `system` instruction may be
    /// supplied; backends without system-role support get it merged into
    /// the prompt body transparently.
    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
    ) -> Result<String, AppError>;
}

/// Chat-completion backed generator. Works against any OpenAI-compatible
/// endpoint (OpenRouter included), which is why model names may carry a
/// provider prefix.
pub struct OpenAiGenerator {
    client: Arc<Client<async_openai::config::OpenAIConfig>>,
    model: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            model,
            timeout,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
    ) -> Self {
        Self::new(
            client,
            config.generation_model.clone(),
            Duration::from_secs(config.llm_timeout_secs),
        )
    }
}

/// Provider prefixes known to accept a system role on OpenRouter-style
/// model identifiers. Unprefixed model names are assumed compatible.
const SYSTEM_ROLE_PREFIXES: [&str; 5] =
    ["anthropic/", "openai/", "meta-llama/", "mistralai/", "cohere/"];

fn supports_system_role(model: &str) -> bool {
    if !model.contains('/') {
        return true;
    }
    SYSTEM_ROLE_PREFIXES
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
    ) -> Result<String, AppError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).temperature(temperature);

        let request = match system {
            Some(system) if supports_system_role(&self.model) => builder
                .messages([
                    ChatCompletionRequestSystemMessage::from(system.to_owned()).into(),
                    ChatCompletionRequestUserMessage::from(prompt.to_owned()).into(),
                ])
                .build(),
            Some(system) => {
                debug!(model = %self.model, "merging system instruction into user prompt");
                builder
                    .messages([ChatCompletionRequestUserMessage::from(format!(
                        "{system}\n\n{prompt}"
                    ))
                    .into()])
                    .build()
            }
            None => builder
                .messages([ChatCompletionRequestUserMessage::from(prompt.to_owned()).into()])
                .build(),
        }
        .map_err(|e| AppError::Generation(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                AppError::Generation(format!(
                    "generation request timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::Generation(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::Generation("No content found in LLM response".into()))?;

        debug!(chars = content.chars().count(), "generation response received");
        Ok(content)
    }
}

//! OpenAI chat completions behind the pipeline's generation seam

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use queryforge_core::{GenerationClient, GenerationError, Prompt};
use tracing::{debug, warn};

use crate::config::GenerationConfig;

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(client: Client<OpenAIConfig>, config: &GenerationConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// The caller's model for this prompt, else the configured one
    fn model_for<'a>(&'a self, prompt: &'a Prompt) -> &'a str {
        prompt.model.as_deref().unwrap_or(&self.model)
    }

    async fn chat(&self, prompt: &Prompt) -> Result<Option<String>, OpenAIError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(prompt.system.clone())
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt.user.clone())
                    .build()?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model_for(prompt))
            .messages(messages)
            .temperature(self.temperature)
            .max_completion_tokens(self.max_tokens)
            .build()?;

        let response = self.client.chat().create(request).await?;
        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

#[async_trait]
impl GenerationClient for OpenAiClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let model = self.model_for(prompt);
        let content = self.chat(prompt).await.map_err(|e| {
            warn!(model, error = %e, "OpenAI request failed");
            map_error(e)
        })?;

        match content {
            Some(text) if !text.trim().is_empty() => {
                debug!(model, length = text.len(), "OpenAI response received");
                Ok(text)
            }
            _ => Err(GenerationError::EmptyResponse),
        }
    }
}

fn map_error(error: OpenAIError) -> GenerationError {
    match &error {
        OpenAIError::ApiError(api) => classify(&api.message, api.r#type.as_deref(), api.code.as_deref()),
        _ => GenerationError::TransportFailure(error.to_string()),
    }
}

/// Rate-limit errors are reported through the error type, the code or only
/// the message depending on the endpoint
fn classify(message: &str, kind: Option<&str>, code: Option<&str>) -> GenerationError {
    let tagged = [kind, code]
        .into_iter()
        .flatten()
        .any(|tag| tag.contains("rate_limit") || tag == "insufficient_quota");
    let lower = message.to_ascii_lowercase();

    if tagged || lower.contains("rate limit") {
        GenerationError::RateLimited(message.to_string())
    } else {
        GenerationError::TransportFailure(format!("OpenAI API error: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limits() {
        assert!(matches!(
            classify("Slow down", Some("requests"), Some("rate_limit_exceeded")),
            GenerationError::RateLimited(_)
        ));
        assert!(matches!(
            classify("Rate limit reached for gpt-4o-mini", None, None),
            GenerationError::RateLimited(_)
        ));
        assert!(matches!(
            classify("You exceeded your current quota", Some("insufficient_quota"), None),
            GenerationError::RateLimited(_)
        ));
    }

    #[test]
    fn test_classify_other_failures() {
        assert_eq!(
            classify("Invalid API key", Some("invalid_request_error"), Some("invalid_api_key")),
            GenerationError::TransportFailure("OpenAI API error: Invalid API key".to_string())
        );
    }

    #[test]
    fn test_prompt_model_overrides_configured_one() {
        let client = OpenAiClient::new(Client::new(), &GenerationConfig::default());
        let mut prompt = queryforge_core::build_prompt("q", None, queryforge_schema::Dialect::Postgres);
        assert_eq!(client.model_for(&prompt), "gpt-4o-mini");

        prompt.model = Some("gpt-4o".to_string());
        assert_eq!(client.model_for(&prompt), "gpt-4o");
    }

    #[test]
    fn test_non_api_errors_are_transport_failures() {
        let err = map_error(OpenAIError::InvalidArgument("no model".to_string()));
        assert!(matches!(err, GenerationError::TransportFailure(_)));
    }
}

use crate::config::{AppConfig, EndpointSettings, Provider};
use crate::error::ClientError;
use crate::models::ChatMessage;
use crate::retry::{retry_with_policy, RetryPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

// Trait defining the interface for chat-completion backends
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    // Short name used in logs and error messages
    fn name(&self) -> &'static str;

    // Sends the ordered messages and returns the assistant's trimmed reply.
    async fn send(&self, messages: &[ChatMessage]) -> Result<String, ClientError>;
}

// --- Wire format shared by OpenAI-compatible endpoints ---

#[derive(Serialize, Debug)]
pub(crate) struct ChatRequestBody<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
}

#[derive(Deserialize, Debug)]
pub(crate) struct ChatResponseBody {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ChatChoice {
    pub message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ChatChoiceMessage {
    pub content: Option<String>,
}

// `{"error": {"message": "...", "code": "..."}}`, the usual error envelope
#[derive(Deserialize, Debug)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorDetail,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ErrorDetail {
    pub code: Option<serde_json::Value>,
    pub message: Option<String>,
}

/// Pulls the remote error message out of a response body, falling back to
/// the raw text.
pub(crate) fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error: ErrorDetail { message: Some(message), .. } }) => message,
        _ if body.trim().is_empty() => "<empty error body>".to_string(),
        _ => body.trim().to_string(),
    }
}

/// Extracts the first choice's content from a chat-completion response.
pub(crate) fn first_choice_content(body: ChatResponseBody) -> Result<String, ClientError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| {
            ClientError::InvalidResponse("missing choices[0].message.content".to_string())
        })
}

// --- OpenAI Compatible Client Implementation ---

pub struct OpenAiCompatibleClient {
    client: Client,
    active_provider: Provider,
    settings: EndpointSettings,
    retry: RetryPolicy,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &AppConfig, client: Client) -> Self {
        Self {
            client,
            active_provider: config.provider,
            settings: config.openai.clone(),
            retry: config.retry,
        }
    }

    fn check_preconditions(&self) -> Result<(), ClientError> {
        if self.active_provider != Provider::OpenAiCompatible {
            return Err(ClientError::ProviderMismatch {
                client: self.name(),
                expected: Provider::OpenAiCompatible,
                active: self.active_provider,
            });
        }
        let missing = self.settings.missing();
        if !missing.is_empty() {
            return Err(ClientError::Configuration(format!(
                "OpenAI-compatible provider is missing {}",
                missing.join(" and ")
            )));
        }
        Ok(())
    }

    fn request_url(&self) -> String {
        format!("{}/chat/completions", self.settings.endpoint.trim_end_matches('/'))
    }

    // A single POST; retry decisions are made by the caller.
    async fn attempt(&self, url: &str, messages: &[ChatMessage]) -> Result<String, ClientError> {
        let request_body = ChatRequestBody {
            model: &self.settings.model,
            messages,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(self.settings.api_key.expose())
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<Failed to read error body>".to_string());
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: error_message(&error_body),
            });
        }

        // A body that cannot be read is a transport failure; one that reads but
        // does not decode is an invalid response
        let text = response.text().await?;
        let body: ChatResponseBody = serde_json::from_str(&text)
            .map_err(|e| ClientError::InvalidResponse(format!("undecodable body: {e}")))?;
        first_choice_content(body)
    }
}

#[async_trait]
impl ChatCompletionClient for OpenAiCompatibleClient {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn send(&self, messages: &[ChatMessage]) -> Result<String, ClientError> {
        self.check_preconditions()?;
        let url = self.request_url();
        log::info!(
            "Sending {} messages to OpenAI compatible API: {} using model: {}",
            messages.len(),
            url,
            self.settings.model
        );

        retry_with_policy(&self.retry, self.name(), ClientError::is_retryable, || {
            self.attempt(&url, messages)
        })
        .await
    }
}

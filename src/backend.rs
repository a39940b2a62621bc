use std::sync::Arc;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::Validate;

use crate::api::{ChatCompletionClient, OpenAiCompatibleClient};
use crate::azure::AzureChatClient;
use crate::config::{AppConfig, Provider};
use crate::error::{FlowError, OutputError};
use crate::managed::{ManagedClient, ManagedRequest};
use crate::models::ChatMessage;
use crate::parse::{parse_and_validate, validate_value};
use crate::prompts::Prompts;

/// The backend every flow dispatches to, chosen once from configuration.
pub enum GenerationBackend {
    /// Schema-constrained decoding performed by the managed service.
    Managed(ManagedClient),
    /// Free-text chat completion; JSON is parsed and validated locally.
    SelfHosted(Arc<dyn ChatCompletionClient>),
}

impl GenerationBackend {
    pub fn from_config(config: &AppConfig, http: Client) -> Self {
        match config.provider {
            Provider::Managed => GenerationBackend::Managed(ManagedClient::new(config, http)),
            Provider::OpenAiCompatible => {
                GenerationBackend::SelfHosted(Arc::new(OpenAiCompatibleClient::new(config, http)))
            }
            Provider::Azure => GenerationBackend::SelfHosted(Arc::new(AzureChatClient::new(config, http))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GenerationBackend::Managed(_) => "managed",
            GenerationBackend::SelfHosted(client) => client.name(),
        }
    }
}

/// A schema-typed generation: the input type knows how to phrase itself for
/// each backend and what shape comes back.
pub(crate) trait StructuredFlow: Sync {
    const NAME: &'static str;
    type Output: DeserializeOwned + Validate + Send;

    /// Output schema in the managed service's OpenAPI subset.
    fn output_schema() -> Value;

    fn managed_request(&self, prompts: &Prompts) -> Result<ManagedRequest, tera::Error>;

    /// `None` when the flow cannot run on a chat-completion backend.
    fn self_hosted_messages(&self, prompts: &Prompts) -> Result<Option<Vec<ChatMessage>>, tera::Error>;

    fn parse_self_hosted(raw: &str) -> Result<Self::Output, OutputError> {
        parse_and_validate(raw)
    }
}

/// Entry point for all flows: a backend plus the prompt templates.
pub struct Generator {
    backend: GenerationBackend,
    prompts: Prompts,
}

impl Generator {
    pub fn new(backend: GenerationBackend) -> Result<Self, tera::Error> {
        Ok(Self {
            backend,
            prompts: Prompts::new()?,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, tera::Error> {
        Self::new(GenerationBackend::from_config(config, Client::new()))
    }

    pub fn backend(&self) -> &GenerationBackend {
        &self.backend
    }

    /// Dispatches one flow invocation. The outer error covers input,
    /// prompt, and transport failures; the inner one is an output that did
    /// not match the declared schema, which each flow handles itself.
    pub(crate) async fn run<F: StructuredFlow>(
        &self,
        input: &F,
    ) -> Result<Result<F::Output, OutputError>, FlowError> {
        let prompt_error = |source| FlowError::Prompt { flow: F::NAME, source };
        let backend_error = |source| FlowError::Backend { flow: F::NAME, source };

        match &self.backend {
            GenerationBackend::Managed(client) => {
                let request = input.managed_request(&self.prompts).map_err(prompt_error)?;
                log::debug!("{}: awaiting managed response", F::NAME);
                let value = client.generate(&request).await.map_err(backend_error)?;
                Ok(validate_value(value))
            }
            GenerationBackend::SelfHosted(client) => {
                let messages = input
                    .self_hosted_messages(&self.prompts)
                    .map_err(prompt_error)?
                    .ok_or(FlowError::Unsupported {
                        flow: F::NAME,
                        backend: client.name(),
                    })?;
                log::debug!("{}: awaiting {} response", F::NAME, client.name());
                let raw = client.send(&messages).await.map_err(backend_error)?;
                Ok(F::parse_self_hosted(&raw))
            }
        }
    }
}

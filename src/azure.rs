use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::api::{first_choice_content, ChatCompletionClient, ChatRequestBody, ChatResponseBody, ErrorEnvelope};
use crate::config::{ApiKey, AppConfig, Provider};
use crate::error::ClientError;
use crate::models::ChatMessage;
use crate::retry::{retry_with_policy, RetryPolicy};

const CLIENT_NAME: &str = "azure";

/// Key credential sent in the `api-key` header.
#[derive(Clone, Debug)]
pub struct AzureKeyCredential {
    key: ApiKey,
}

impl AzureKeyCredential {
    pub fn new(key: ApiKey) -> Self {
        Self { key }
    }

    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("api-key", self.key.expose())
    }
}

// Fully initialised transport; only exists when configuration was usable.
struct AzureModelClient {
    http: Client,
    completions_url: Url,
    credential: AzureKeyCredential,
    model: String,
}

impl AzureModelClient {
    fn initialize(config: &AppConfig, http: Client) -> Result<Self, String> {
        let settings = &config.azure.connection;
        let missing = settings.missing();
        if !missing.is_empty() {
            return Err(format!("missing {}", missing.join(" and ")));
        }

        let base = Url::parse(settings.endpoint.trim_end_matches('/'))
            .map_err(|e| format!("invalid endpoint '{}': {}", settings.endpoint, e))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(format!("unsupported endpoint scheme '{}'", base.scheme()));
        }

        let mut completions_url = Url::parse(&format!("{}/chat/completions", base.as_str().trim_end_matches('/')))
            .map_err(|e| format!("invalid endpoint '{}': {}", settings.endpoint, e))?;
        completions_url
            .query_pairs_mut()
            .append_pair("api-version", &config.azure.api_version);

        Ok(Self {
            http,
            completions_url,
            credential: AzureKeyCredential::new(settings.api_key.clone()),
            model: settings.model.clone(),
        })
    }

    async fn post_chat_completions(&self, messages: &[ChatMessage]) -> Result<AzureResponse, ClientError> {
        let body = ChatRequestBody {
            model: &self.model,
            messages,
        };
        let request = self.credential.apply(self.http.post(self.completions_url.clone()));
        let response = request.json(&body).send().await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok(AzureResponse { status, body: text })
    }
}

/// Structured view over a completed response, in the shape the Azure
/// inference SDK exposes.
#[derive(Debug)]
pub struct AzureResponse {
    pub status: u16,
    pub body: String,
}

impl AzureResponse {
    /// Anything outside 2xx.
    pub fn is_unexpected(&self) -> bool {
        !(200..300).contains(&self.status)
    }

    /// Converts an unexpected response into a client error, reading the
    /// service's `{error: {code, message}}` envelope when present.
    pub fn into_error(self) -> ClientError {
        let message = match serde_json::from_str::<ErrorEnvelope>(&self.body) {
            Ok(envelope) => {
                let code = envelope
                    .error
                    .code
                    .map(|code| match code {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    });
                match (code, envelope.error.message) {
                    (Some(code), Some(message)) => format!("{code}: {message}"),
                    (None, Some(message)) => message,
                    (Some(code), None) => code,
                    (None, None) => self.body.trim().to_string(),
                }
            }
            Err(_) => crate::api::error_message(&self.body),
        };
        ClientError::Status {
            status: self.status,
            message,
        }
    }

    fn into_content(self) -> Result<String, ClientError> {
        let body: ChatResponseBody = serde_json::from_str(&self.body)
            .map_err(|e| ClientError::InvalidResponse(format!("undecodable body: {e}")))?;
        first_choice_content(body)
    }
}

/// Azure AI inference chat-completion client.
pub struct AzureChatClient {
    active_provider: Provider,
    inner: Option<AzureModelClient>,
    retry: RetryPolicy,
}

impl AzureChatClient {
    /// Attempts initialisation once. A client that could not be initialised
    /// is still returned, but every `send` on it fails fast.
    pub fn new(config: &AppConfig, http: Client) -> Self {
        let inner = match AzureModelClient::initialize(config, http) {
            Ok(inner) => {
                log::info!("Azure AI inference client initialized for {}", inner.completions_url);
                Some(inner)
            }
            Err(reason) if config.provider == Provider::Azure => {
                log::error!("Azure AI inference client not initialized: {}", reason);
                None
            }
            Err(reason) => {
                log::debug!("Azure AI inference client not initialized: {}", reason);
                None
            }
        };
        Self {
            active_provider: config.provider,
            inner,
            retry: config.retry,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    async fn attempt(inner: &AzureModelClient, messages: &[ChatMessage]) -> Result<String, ClientError> {
        let response = inner.post_chat_completions(messages).await?;
        if response.is_unexpected() {
            return Err(response.into_error());
        }
        response.into_content()
    }
}

#[async_trait]
impl ChatCompletionClient for AzureChatClient {
    fn name(&self) -> &'static str {
        CLIENT_NAME
    }

    async fn send(&self, messages: &[ChatMessage]) -> Result<String, ClientError> {
        if self.active_provider != Provider::Azure {
            return Err(ClientError::ProviderMismatch {
                client: CLIENT_NAME,
                expected: Provider::Azure,
                active: self.active_provider,
            });
        }
        let inner = self.inner.as_ref().ok_or(ClientError::NotInitialized(CLIENT_NAME))?;

        log::info!(
            "Sending {} messages to Azure AI inference using model: {}",
            messages.len(),
            inner.model
        );
        retry_with_policy(&self.retry, CLIENT_NAME, ClientError::is_retryable, || {
            Self::attempt(inner, messages)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AZURE_API_KEY_VAR, AZURE_ENDPOINT_VAR, AZURE_MODEL_VAR, PROVIDER_VAR};
    use std::time::Duration;

    fn config_for(endpoint: Option<&str>, key: Option<&str>) -> AppConfig {
        let mut config = AppConfig::from_lookup(|name| match name {
            PROVIDER_VAR => Some("azure".to_string()),
            AZURE_ENDPOINT_VAR => endpoint.map(str::to_string),
            AZURE_API_KEY_VAR => key.map(str::to_string),
            AZURE_MODEL_VAR => Some("phi-4".to_string()),
            _ => None,
        });
        config.retry = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
        };
        config
    }

    #[tokio::test]
    async fn posts_with_api_key_header_and_version() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_query(mockito::Matcher::UrlEncoded(
                "api-version".into(),
                "2024-05-01-preview".into(),
            ))
            .match_header("api-key", "azure-key")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({ "model": "phi-4" })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}]}"#)
            .expect(1)
            .create_async()
            .await;

        let client = AzureChatClient::new(&config_for(Some(&server.url()), Some("azure-key")), Client::new());
        assert!(client.is_initialized());
        let reply = client.send(&[ChatMessage::user("ping")]).await.unwrap();
        assert_eq!(reply, "ok");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limited_then_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .with_body(r#"{"error":{"code":"429","message":"Rate limit reached"}}"#)
            .expect(3)
            .create_async()
            .await;

        let client = AzureChatClient::new(&config_for(Some(&server.url()), Some("azure-key")), Client::new());
        let err = client.send(&[ChatMessage::user("ping")]).await.unwrap_err();
        match err {
            ClientError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("Rate limit reached"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .with_body(r#"{"error":{"code":"Unauthorized","message":"Access denied"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = AzureChatClient::new(&config_for(Some(&server.url()), Some("wrong")), Client::new());
        let err = client.send(&[ChatMessage::user("ping")]).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Status { status: 401, ref message } if message == "Unauthorized: Access denied"
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn refused_connections_are_retried_until_exhausted() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = AzureChatClient::new(&config_for(Some(&url), Some("azure-key")), Client::new());
        let err = client.send(&[ChatMessage::user("ping")]).await.unwrap_err();
        match err {
            ClientError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, ClientError::Network(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_configuration_leaves_client_uninitialized() {
        let client = AzureChatClient::new(&config_for(None, Some("azure-key")), Client::new());
        assert!(!client.is_initialized());
        let err = client.send(&[ChatMessage::user("ping")]).await.unwrap_err();
        assert!(matches!(err, ClientError::NotInitialized("azure")));
    }

    #[tokio::test]
    async fn malformed_endpoint_leaves_client_uninitialized() {
        let client = AzureChatClient::new(&config_for(Some("not a url"), Some("k")), Client::new());
        assert!(!client.is_initialized());
    }

    #[test]
    fn unexpected_responses() {
        assert!(!AzureResponse { status: 200, body: String::new() }.is_unexpected());
        assert!(AzureResponse { status: 500, body: String::new() }.is_unexpected());
        let err = AzureResponse { status: 502, body: "bad gateway".into() }.into_error();
        assert!(err.is_retryable());
    }
}

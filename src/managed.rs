//! Client for the managed generative-AI service (Google Generative Language
//! `generateContent`). The service performs schema-constrained decoding, so
//! every request carries the flow's declared output schema.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{AppConfig, EndpointSettings};
use crate::error::ClientError;
use crate::parse::strip_code_fences;
use crate::retry::{retry_with_policy, RetryPolicy};

const CLIENT_NAME: &str = "managed";

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData {
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Content {
    pub role: &'static str,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self { role: "user", parts }
    }
}

/// One schema-constrained generation request.
#[derive(Debug, Clone)]
pub struct ManagedRequest {
    pub system: Option<String>,
    pub contents: Vec<Content>,
    pub response_schema: Value,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: &'a [Content],
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize, Debug)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'static str,
    response_schema: &'a Value,
}

#[derive(Deserialize, Debug)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug)]
struct CandidatePart {
    text: Option<String>,
}

pub struct ManagedClient {
    client: Client,
    settings: EndpointSettings,
    retry: RetryPolicy,
}

impl ManagedClient {
    pub fn new(config: &AppConfig, client: Client) -> Self {
        Self {
            client,
            settings: config.managed.clone(),
            retry: config.retry,
        }
    }

    /// Runs one generation and returns the decoded JSON value. The value is
    /// not yet validated against the flow's types; callers do that.
    pub async fn generate(&self, request: &ManagedRequest) -> Result<Value, ClientError> {
        let missing = self.settings.missing();
        if !missing.is_empty() {
            return Err(ClientError::Configuration(format!(
                "managed provider is missing {}",
                missing.join(" and ")
            )));
        }

        let url = format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        );
        let body = GenerateContentBody {
            system_instruction: request.system.as_ref().map(|text| SystemInstruction {
                parts: vec![Part::text(text.clone())],
            }),
            contents: &request.contents,
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: &request.response_schema,
            },
        };

        log::info!("Sending generateContent request using model: {}", self.settings.model);
        let text = retry_with_policy(&self.retry, CLIENT_NAME, ClientError::is_retryable, || {
            self.attempt(&url, &body)
        })
        .await?;

        serde_json::from_str(strip_code_fences(&text))
            .map_err(|e| ClientError::InvalidResponse(format!("managed output is not JSON: {e}")))
    }

    async fn attempt(&self, url: &str, body: &GenerateContentBody<'_>) -> Result<String, ClientError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.settings.api_key.expose())
            .json(body)
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
                message: crate::api::error_message(&error_body),
            });
        }

        let raw = response.text().await?;
        let decoded: GenerateContentResponse = serde_json::from_str(&raw)
            .map_err(|e| ClientError::InvalidResponse(format!("undecodable body: {e}")))?;

        let text: String = decoded
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ClientError::InvalidResponse(
                "missing candidates[0].content.parts text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GEMINI_API_KEY_VAR, GEMINI_ENDPOINT_VAR};
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    fn client_for(endpoint: &str, key: Option<&str>) -> ManagedClient {
        let mut config = AppConfig::from_lookup(|name| match name {
            GEMINI_ENDPOINT_VAR => Some(endpoint.to_string()),
            GEMINI_API_KEY_VAR => key.map(str::to_string),
            _ => None,
        });
        config.retry = RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
        };
        ManagedClient::new(&config, Client::new())
    }

    fn request() -> ManagedRequest {
        ManagedRequest {
            system: Some("You are a scribe.".to_string()),
            contents: vec![Content::user(vec![
                Part::text("Transcribe this."),
                Part::InlineData {
                    mime_type: "audio/webm".to_string(),
                    data: "AAAA".to_string(),
                },
            ])],
            response_schema: json!({
                "type": "OBJECT",
                "properties": { "transcript": { "type": "STRING" } },
                "required": ["transcript"]
            }),
        }
    }

    #[tokio::test]
    async fn sends_schema_and_parses_candidate_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.0-flash:generateContent")
            .match_header("x-goog-api-key", "gem-key")
            .match_body(Matcher::PartialJson(json!({
                "systemInstruction": { "parts": [{ "text": "You are a scribe." }] },
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "text": "Transcribe this." },
                        { "inlineData": { "mimeType": "audio/webm", "data": "AAAA" } }
                    ]
                }],
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .with_status(200)
            .with_body(
                json!({
                    "candidates": [{
                        "content": { "role": "model", "parts": [{ "text": "{\"transcript\":\"Hello doctor\"}" }] }
                    }]
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let value = client_for(&server.url(), Some("gem-key"))
            .generate(&request())
            .await
            .unwrap();
        assert_eq!(value, json!({ "transcript": "Hello doctor" }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_key_fails_before_request() {
        let err = client_for("http://127.0.0.1:9", None)
            .generate(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[tokio::test]
    async fn empty_candidates_are_invalid() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.0-flash:generateContent")
            .with_status(200)
            .with_body(r#"{"candidates":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let err = client_for(&server.url(), Some("gem-key"))
            .generate(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_retried_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.0-flash:generateContent")
            .with_status(500)
            .with_body(r#"{"error":{"code":500,"message":"internal"}}"#)
            .expect(2)
            .create_async()
            .await;

        let err = client_for(&server.url(), Some("gem-key"))
            .generate(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::RetriesExhausted { attempts: 2, .. }));
        mock.assert_async().await;
    }
}

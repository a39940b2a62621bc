use thiserror::Error;
use validator::ValidationErrors;

use crate::config::Provider;

/// Failures raised by the chat-completion and managed-service clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{client} client requires provider `{expected}` but `{active}` is active")]
    ProviderMismatch {
        client: &'static str,
        expected: Provider,
        active: Provider,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("{0} client not initialized; check endpoint and API key configuration")]
    NotInitialized(&'static str),
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ClientError>,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// HTTP 429 and 5xx, plus transport-level failures, are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Status { status, .. } => is_transient_status(*status),
            ClientError::Network(e) => !e.is_builder(),
            _ => false,
        }
    }

    /// HTTP status carried by this error, looking through retry exhaustion.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }
}

pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Failures raised by the structured generation flows.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("{flow}: {source}")]
    Backend {
        flow: &'static str,
        #[source]
        source: ClientError,
    },
    #[error("{flow}: malformed model output: {reason}")]
    MalformedOutput { flow: &'static str, reason: String },
    #[error("{flow}: not supported by the {backend} backend")]
    Unsupported { flow: &'static str, backend: &'static str },
    #[error("{flow}: failed to render prompt: {source}")]
    Prompt {
        flow: &'static str,
        #[source]
        source: tera::Error,
    },
}

/// Why a model response could not be turned into a typed result.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("response is not valid JSON for the expected shape: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response failed schema validation: {0}")]
    Schema(#[from] ValidationErrors),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let transient = [429u16, 500, 502, 503, 599];
        let permanent = [400u16, 401, 403, 404, 422];
        for status in transient {
            let err = ClientError::Status { status, message: String::new() };
            assert!(err.is_retryable(), "{status} should be retryable");
        }
        for status in permanent {
            let err = ClientError::Status { status, message: String::new() };
            assert!(!err.is_retryable(), "{status} should not be retryable");
        }
    }

    #[test]
    fn invalid_response_is_not_retried() {
        assert!(!ClientError::InvalidResponse("empty".into()).is_retryable());
        assert!(!ClientError::Configuration("no key".into()).is_retryable());
        assert!(!ClientError::NotInitialized("azure").is_retryable());
    }

    #[test]
    fn backend_error_carries_flow_prefix() {
        let err = FlowError::Backend {
            flow: "generateSoapNote",
            source: ClientError::Status { status: 400, message: "bad request".into() },
        };
        assert_eq!(
            err.to_string(),
            "generateSoapNote: request failed with status 400: bad request"
        );
    }

    #[test]
    fn exhausted_error_exposes_inner_status() {
        let err = ClientError::RetriesExhausted {
            attempts: 4,
            source: Box::new(ClientError::Status { status: 503, message: "busy".into() }),
        };
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("after 4 attempts"));
    }
}

//! Structured generation flows. Each flow validates its input, dispatches
//! through the [`Generator`](crate::backend::Generator), and returns a value
//! that satisfies its declared output type, a documented fallback, or an
//! error prefixed with the flow's name.

mod billing;
mod chat;
mod soap;
mod transcription;

pub use billing::{BillingCode, BillingCodesInput, BillingCodesOutput};
pub use chat::{ChatInput, ChatOutput, ChatTurn};
pub use soap::{SoapNoteInput, SoapNoteOutput};
pub use transcription::{parse_data_uri, DataUri, TranscriptionInput, TranscriptionOutput};

use std::borrow::Cow;

use validator::{ValidationError, ValidationErrors};

// Rejects empty and whitespace-only text.
pub(crate) fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("blank");
        error.message = Some(Cow::Borrowed("must not be empty"));
        return Err(error);
    }
    Ok(())
}

pub(crate) fn field_error(field: &'static str, code: &'static str, message: String) -> ValidationErrors {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Owned(message));
    let mut errors = ValidationErrors::new();
    errors.add(field, error);
    errors
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::api::ChatCompletionClient;
    use crate::backend::{GenerationBackend, Generator};
    use crate::error::ClientError;
    use crate::models::ChatMessage;

    /// Chat client that replays canned replies and records every request.
    #[derive(Default)]
    pub struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, ClientError>>>,
        pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedClient {
        pub fn replying(reply: &str) -> Arc<Self> {
            Self::with(vec![Ok(reply.to_string())])
        }

        pub fn with(replies: Vec<Result<String, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::default(),
            })
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn last_request(&self) -> Vec<ChatMessage> {
            self.requests.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl ChatCompletionClient for ScriptedClient {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn send(&self, messages: &[ChatMessage]) -> Result<String, ClientError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::InvalidResponse("no scripted reply left".into())))
        }
    }

    pub fn generator_with(client: Arc<ScriptedClient>) -> Generator {
        Generator::new(GenerationBackend::SelfHosted(client)).unwrap()
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tera::Context;
use validator::Validate;

use super::{field_error, not_blank};
use crate::backend::{Generator, StructuredFlow};
use crate::error::{FlowError, OutputError};
use crate::managed::{Content, ManagedRequest, Part};
use crate::models::{ChatMessage, Role};
use crate::prompts::{Prompts, CHAT_MANAGED, CHAT_SYSTEM};

const FLOW: &str = "chat";

/// One earlier turn of the conversation.
#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    #[validate(custom(function = "not_blank"))]
    pub content: String,
}

#[derive(Serialize, Deserialize, Validate, Debug, Clone)]
pub struct ChatInput {
    #[validate(custom(function = "not_blank"))]
    pub message: String,
    #[serde(default)]
    #[validate(nested)]
    pub history: Vec<ChatTurn>,
}

#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq)]
pub struct ChatOutput {
    #[validate(custom(function = "not_blank"))]
    pub response: String,
}

impl StructuredFlow for ChatInput {
    const NAME: &'static str = FLOW;
    type Output = ChatOutput;

    fn output_schema() -> Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "response": { "type": "STRING", "description": "The assistant's reply." }
            },
            "required": ["response"]
        })
    }

    fn managed_request(&self, prompts: &Prompts) -> Result<ManagedRequest, tera::Error> {
        let mut context = Context::new();
        context.insert("history", &self.history);
        context.insert("message", &self.message);
        Ok(ManagedRequest {
            system: Some(prompts.render(CHAT_SYSTEM, &Context::new())?),
            contents: vec![Content::user(vec![Part::text(prompts.render(CHAT_MANAGED, &context)?)])],
            response_schema: Self::output_schema(),
        })
    }

    fn self_hosted_messages(&self, prompts: &Prompts) -> Result<Option<Vec<ChatMessage>>, tera::Error> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(prompts.render(CHAT_SYSTEM, &Context::new())?));
        messages.extend(
            self.history
                .iter()
                .map(|turn| ChatMessage::new(turn.role, turn.content.clone())),
        );
        messages.push(ChatMessage::user(self.message.clone()));
        Ok(Some(messages))
    }

    // Chat replies are prose; the reply text is the response.
    fn parse_self_hosted(raw: &str) -> Result<ChatOutput, OutputError> {
        let output = ChatOutput {
            response: raw.trim().to_string(),
        };
        output.validate()?;
        Ok(output)
    }
}

impl Generator {
    /// Answers a clinician's message in the context of earlier turns.
    pub async fn chat(&self, input: ChatInput) -> Result<ChatOutput, FlowError> {
        input.validate()?;
        if let Some(index) = input.history.iter().position(|turn| turn.role == Role::System) {
            return Err(field_error(
                "history",
                "role",
                format!("turn {index} has role 'system'; history may only hold user and assistant turns"),
            )
            .into());
        }
        log::info!("{}: answering with {} prior turns", FLOW, input.history.len());

        self.run(&input).await?.map_err(|e| FlowError::MalformedOutput {
            flow: FLOW,
            reason: e.to_string(),
        })
    }
}

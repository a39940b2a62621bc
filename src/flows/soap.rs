use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tera::Context;
use validator::Validate;

use super::not_blank;
use crate::backend::{Generator, StructuredFlow};
use crate::error::FlowError;
use crate::managed::{Content, ManagedRequest, Part};
use crate::models::ChatMessage;
use crate::prompts::{Prompts, SOAP_MANAGED, SOAP_SELF_HOSTED};

const FLOW: &str = "generateSoapNote";

#[derive(Serialize, Deserialize, Validate, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SoapNoteInput {
    #[validate(custom(function = "not_blank"))]
    pub patient_id: String,
    #[validate(custom(function = "not_blank"))]
    pub encounter_transcript: String,
    /// Free-text history; may be empty for a new patient.
    #[serde(default)]
    pub patient_history: String,
}

#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SoapNoteOutput {
    #[validate(custom(function = "not_blank"))]
    pub soap_note: String,
}

impl SoapNoteInput {
    fn context(&self) -> Context {
        let mut context = Context::new();
        context.insert("patient_id", &self.patient_id);
        context.insert("encounter_transcript", &self.encounter_transcript);
        context.insert("patient_history", self.patient_history.trim());
        context
    }
}

impl StructuredFlow for SoapNoteInput {
    const NAME: &'static str = FLOW;
    type Output = SoapNoteOutput;

    fn output_schema() -> Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "soapNote": {
                    "type": "STRING",
                    "description": "The complete SOAP note: Subjective, Objective, Assessment and Plan sections."
                }
            },
            "required": ["soapNote"]
        })
    }

    fn managed_request(&self, prompts: &Prompts) -> Result<ManagedRequest, tera::Error> {
        Ok(ManagedRequest {
            system: Some(prompts.scribe_system().to_string()),
            contents: vec![Content::user(vec![Part::text(prompts.render(SOAP_MANAGED, &self.context())?)])],
            response_schema: Self::output_schema(),
        })
    }

    fn self_hosted_messages(&self, prompts: &Prompts) -> Result<Option<Vec<ChatMessage>>, tera::Error> {
        Ok(Some(vec![
            ChatMessage::system(prompts.scribe_system()),
            ChatMessage::user(prompts.render(SOAP_SELF_HOSTED, &self.context())?),
        ]))
    }
}

impl Generator {
    /// Drafts a SOAP note for one encounter. Never resolves with an empty
    /// note: malformed output is an error, not a fallback.
    pub async fn generate_soap_note(&self, input: SoapNoteInput) -> Result<SoapNoteOutput, FlowError> {
        input.validate()?;
        log::info!("{}: drafting note for patient {}", FLOW, input.patient_id);

        self.run(&input).await?.map_err(|e| {
            log::error!("{}: discarding malformed output: {}", FLOW, e);
            FlowError::MalformedOutput {
                flow: FLOW,
                reason: e.to_string(),
            }
        })
    }
}

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tera::Context;
use validator::Validate;

use super::{field_error, not_blank};
use crate::backend::{Generator, StructuredFlow};
use crate::error::FlowError;
use crate::managed::{Content, ManagedRequest, Part};
use crate::models::ChatMessage;
use crate::prompts::{Prompts, TRANSCRIBE_MANAGED};

const FLOW: &str = "transcribePatientEncounter";

#[derive(Serialize, Deserialize, Validate, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionInput {
    /// `data:<mime-type>;base64,<data>`
    #[validate(custom(function = "not_blank"))]
    pub audio_data_uri: String,
}

#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionOutput {
    #[validate(custom(function = "not_blank"))]
    pub transcript: String,
}

/// The two halves of a base64 data URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUri<'a> {
    pub mime_type: &'a str,
    pub data: &'a str,
}

/// Splits `data:<mime-type>;base64,<data>`. Returns `None` unless the mime
/// type looks like `type/subtype` and the payload is non-empty valid base64.
pub fn parse_data_uri(uri: &str) -> Option<DataUri<'_>> {
    let rest = uri.trim().strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    // Parameters such as `;codecs=opus` may precede the base64 marker
    let essence = mime_type.split(';').next()?;
    let (kind, subtype) = essence.split_once('/')?;
    if kind.is_empty() || subtype.is_empty() || data.is_empty() {
        return None;
    }
    STANDARD.decode(data).ok()?;
    Some(DataUri { mime_type, data })
}

impl StructuredFlow for TranscriptionInput {
    const NAME: &'static str = FLOW;
    type Output = TranscriptionOutput;

    fn output_schema() -> Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "transcript": { "type": "STRING", "description": "Verbatim transcript of the encounter." }
            },
            "required": ["transcript"]
        })
    }

    fn managed_request(&self, prompts: &Prompts) -> Result<ManagedRequest, tera::Error> {
        let instruction = prompts.render(TRANSCRIBE_MANAGED, &Context::new())?;
        let mut parts = vec![Part::text(instruction)];
        // Input was validated before dispatch, so the URI parses here
        if let Some(audio) = parse_data_uri(&self.audio_data_uri) {
            parts.push(Part::InlineData {
                mime_type: audio.mime_type.to_string(),
                data: audio.data.to_string(),
            });
        }
        Ok(ManagedRequest {
            system: None,
            contents: vec![Content::user(parts)],
            response_schema: Self::output_schema(),
        })
    }

    fn self_hosted_messages(&self, _prompts: &Prompts) -> Result<Option<Vec<ChatMessage>>, tera::Error> {
        // Chat-completion endpoints take text only
        Ok(None)
    }
}

impl Generator {
    /// Transcribes an encounter recording supplied as a base64 data URI.
    pub async fn transcribe_patient_encounter(
        &self,
        input: TranscriptionInput,
    ) -> Result<TranscriptionOutput, FlowError> {
        input.validate()?;
        let audio = parse_data_uri(&input.audio_data_uri).ok_or_else(|| {
            field_error(
                "audio_data_uri",
                "data_uri",
                "expected data:<mime-type>;base64,<data>".to_string(),
            )
        })?;
        log::info!(
            "{}: transcribing {} audio ({} base64 chars)",
            FLOW,
            audio.mime_type,
            audio.data.len()
        );

        self.run(&input).await?.map_err(|e| FlowError::MalformedOutput {
            flow: FLOW,
            reason: e.to_string(),
        })
    }
}

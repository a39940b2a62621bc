use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tera::Context;
use validator::Validate;

use super::not_blank;
use crate::backend::{Generator, StructuredFlow};
use crate::error::FlowError;
use crate::managed::{Content, ManagedRequest, Part};
use crate::models::ChatMessage;
use crate::prompts::{Prompts, BILLING_MANAGED, BILLING_SELF_HOSTED};

const FLOW: &str = "generateBillingCodes";

#[derive(Serialize, Deserialize, Validate, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BillingCodesInput {
    #[validate(custom(function = "not_blank"))]
    pub soap_note: String,
}

#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BillingCode {
    #[validate(custom(function = "not_blank"))]
    pub code: String,
    #[validate(custom(function = "not_blank"))]
    pub description: String,
    // e.g. "$80 - $120"
    pub estimated_bill_amount_range: String,
}

#[derive(Serialize, Deserialize, Validate, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BillingCodesOutput {
    #[validate(nested)]
    pub billing_codes: Vec<BillingCode>,
}

impl BillingCodesInput {
    fn context(&self) -> Context {
        let mut context = Context::new();
        context.insert("soap_note", &self.soap_note);
        context
    }
}

impl StructuredFlow for BillingCodesInput {
    const NAME: &'static str = FLOW;
    type Output = BillingCodesOutput;

    fn output_schema() -> Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "billingCodes": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "code": { "type": "STRING", "description": "ICD-10 or CPT code" },
                            "description": { "type": "STRING" },
                            "estimatedBillAmountRange": { "type": "STRING", "description": "e.g. $80 - $120" }
                        },
                        "required": ["code", "description", "estimatedBillAmountRange"]
                    }
                }
            },
            "required": ["billingCodes"]
        })
    }

    fn managed_request(&self, prompts: &Prompts) -> Result<ManagedRequest, tera::Error> {
        Ok(ManagedRequest {
            system: Some(prompts.scribe_system().to_string()),
            contents: vec![Content::user(vec![Part::text(prompts.render(BILLING_MANAGED, &self.context())?)])],
            response_schema: Self::output_schema(),
        })
    }

    fn self_hosted_messages(&self, prompts: &Prompts) -> Result<Option<Vec<ChatMessage>>, tera::Error> {
        Ok(Some(vec![
            ChatMessage::system(prompts.scribe_system()),
            ChatMessage::user(prompts.render(BILLING_SELF_HOSTED, &self.context())?),
        ]))
    }
}

impl Generator {
    /// Suggests billing codes for a SOAP note. Output that does not match the
    /// expected shape degrades to an empty list.
    pub async fn generate_billing_codes(&self, input: BillingCodesInput) -> Result<BillingCodesOutput, FlowError> {
        input.validate()?;
        log::info!("{}: suggesting codes for a {} char note", FLOW, input.soap_note.len());

        match self.run(&input).await? {
            Ok(output) => {
                log::info!("{}: {} codes suggested", FLOW, output.billing_codes.len());
                Ok(output)
            }
            Err(e) => {
                log::warn!("{}: model output did not match the schema, returning no codes: {}", FLOW, e);
                Ok(BillingCodesOutput::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::flows::testing::{generator_with, ScriptedClient};

    fn sinusitis() -> BillingCodesInput {
        BillingCodesInput {
            soap_note: "Assessment: Sinusitis\nPlan: Antibiotics".to_string(),
        }
    }

    #[tokio::test]
    async fn returns_the_suggested_code() {
        let client = ScriptedClient::replying(
            r#"{"billingCodes":[{"code":"J01.90","description":"Acute sinusitis","estimatedBillAmountRange":"$80 - $120"}]}"#,
        );
        let generator = generator_with(client.clone());

        let output = generator.generate_billing_codes(sinusitis()).await.unwrap();
        assert_eq!(
            output.billing_codes,
            vec![BillingCode {
                code: "J01.90".to_string(),
                description: "Acute sinusitis".to_string(),
                estimated_bill_amount_range: "$80 - $120".to_string(),
            }]
        );
        assert!(client.last_request()[1].content.contains("Assessment: Sinusitis"));
    }

    #[tokio::test]
    async fn fenced_empty_list_parses() {
        let client = ScriptedClient::replying("```json\n{\"billingCodes\":[]}\n```");
        let output = generator_with(client).generate_billing_codes(sinusitis()).await.unwrap();
        assert!(output.billing_codes.is_empty());
    }

    #[tokio::test]
    async fn fenced_codes_with_trailing_prose_parse() {
        let client = ScriptedClient::replying(
            "```json\n{\"billingCodes\":[{\"code\":\"J01.90\",\"description\":\"Acute sinusitis\",\"estimatedBillAmountRange\":\"$80 - $120\"}]}\n```\nLet me know if you need more.",
        );
        let output = generator_with(client).generate_billing_codes(sinusitis()).await.unwrap();
        assert_eq!(output.billing_codes.len(), 1);
        assert_eq!(output.billing_codes[0].code, "J01.90");
    }

    #[tokio::test]
    async fn missing_key_falls_back_to_empty() {
        let client = ScriptedClient::replying(r#"{"codes":[{"code":"J01.90"}]}"#);
        let output = generator_with(client).generate_billing_codes(sinusitis()).await.unwrap();
        assert_eq!(output, BillingCodesOutput::default());
    }

    #[tokio::test]
    async fn blank_code_falls_back_to_empty() {
        let client = ScriptedClient::replying(
            r#"{"billingCodes":[{"code":"","description":"Acute sinusitis","estimatedBillAmountRange":"$80"}]}"#,
        );
        let output = generator_with(client).generate_billing_codes(sinusitis()).await.unwrap();
        assert!(output.billing_codes.is_empty());
    }

    #[tokio::test]
    async fn not_json_falls_back_to_empty() {
        let client = ScriptedClient::replying("I could not find any billable services.");
        let output = generator_with(client).generate_billing_codes(sinusitis()).await.unwrap();
        assert!(output.billing_codes.is_empty());
    }

    #[tokio::test]
    async fn transport_errors_still_propagate() {
        let client = ScriptedClient::with(vec![Err(ClientError::RetriesExhausted {
            attempts: 4,
            source: Box::new(ClientError::Status { status: 503, message: "busy".into() }),
        })]);
        let err = generator_with(client).generate_billing_codes(sinusitis()).await.unwrap_err();
        assert!(err.to_string().starts_with("generateBillingCodes: request failed after 4 attempts"));
    }

    #[tokio::test]
    async fn empty_note_is_rejected() {
        let client = ScriptedClient::replying("{\"billingCodes\":[]}");
        let generator = generator_with(client.clone());
        let err = generator
            .generate_billing_codes(BillingCodesInput { soap_note: String::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
        assert_eq!(client.request_count(), 0);
    }

    #[test]
    fn output_serializes_camel_case() {
        let output = BillingCodesOutput {
            billing_codes: vec![BillingCode {
                code: "99213".into(),
                description: "Office visit".into(),
                estimated_bill_amount_range: "$90 - $150".into(),
            }],
        };
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["billingCodes"][0]["estimatedBillAmountRange"], "$90 - $150");
    }
}

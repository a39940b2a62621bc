use tera::{Context, Tera};

pub const TRANSCRIBE_MANAGED: &str = "transcribe.managed";
pub const SOAP_MANAGED: &str = "soap_note.managed";
pub const SOAP_SELF_HOSTED: &str = "soap_note.self_hosted";
pub const BILLING_MANAGED: &str = "billing_codes.managed";
pub const BILLING_SELF_HOSTED: &str = "billing_codes.self_hosted";
pub const CHAT_SYSTEM: &str = "chat.system";
pub const CHAT_MANAGED: &str = "chat.managed";

const SCRIBE_SYSTEM: &str = "You are an experienced medical scribe working for a licensed clinician. \
You document only what is supported by the material you are given and never invent findings.";

const TRANSCRIBE_MANAGED_SRC: &str = r#"Transcribe the attached recording of a patient encounter verbatim.
Label speakers as "Clinician:" and "Patient:" when they can be told apart.
Return the transcript in the "transcript" field."#;

const SOAP_BODY_SRC: &str = r#"Write a SOAP note (Subjective, Objective, Assessment, Plan) for the encounter below.

Patient ID: {{ patient_id }}
{% if patient_history %}
Patient history:
{{ patient_history }}
{% else %}
Patient history: none on file.
{% endif %}
Encounter transcript:
{{ encounter_transcript }}"#;

const SOAP_MANAGED_SRC: &str = r#"{% include "soap_note.body" %}

Return the complete note as text in the "soapNote" field."#;

const SOAP_SELF_HOSTED_SRC: &str = r#"{% include "soap_note.body" %}

Respond with a single JSON object and nothing else, exactly in this shape:
{"soapNote": "<the complete SOAP note as one string, sections separated by newlines>"}"#;

const BILLING_BODY_SRC: &str = r#"Suggest the billing codes (ICD-10 for diagnoses, CPT for procedures and visits) supported by this SOAP note.
For each code give a short description and an estimated bill amount range in US dollars, such as "$80 - $120".
Suggest no codes rather than guessing when the note does not support any.

SOAP note:
{{ soap_note }}"#;

const BILLING_MANAGED_SRC: &str = r#"{% include "billing_codes.body" %}

Return the codes in the "billingCodes" array."#;

const BILLING_SELF_HOSTED_SRC: &str = r#"{% include "billing_codes.body" %}

Respond with a single JSON object and nothing else, exactly in this shape:
{"billingCodes": [{"code": "<code>", "description": "<description>", "estimatedBillAmountRange": "<range>"}]}
Use an empty array when no code applies."#;

const CHAT_SYSTEM_SRC: &str = "You are a clinical assistant helping a clinician with documentation, \
coding, and general medical questions. Answer concisely. You do not replace clinical judgement.";

const CHAT_MANAGED_SRC: &str = r#"{% for turn in history %}{{ turn.role }}: {{ turn.content }}
{% endfor %}user: {{ message }}

Reply to the last user message. Return your reply in the "response" field."#;

/// Prompt templates for every flow, registered once.
pub struct Prompts {
    tera: Tera,
}

impl Prompts {
    pub fn new() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (TRANSCRIBE_MANAGED, TRANSCRIBE_MANAGED_SRC),
            ("soap_note.body", SOAP_BODY_SRC),
            (SOAP_MANAGED, SOAP_MANAGED_SRC),
            (SOAP_SELF_HOSTED, SOAP_SELF_HOSTED_SRC),
            ("billing_codes.body", BILLING_BODY_SRC),
            (BILLING_MANAGED, BILLING_MANAGED_SRC),
            (BILLING_SELF_HOSTED, BILLING_SELF_HOSTED_SRC),
            (CHAT_SYSTEM, CHAT_SYSTEM_SRC),
            (CHAT_MANAGED, CHAT_MANAGED_SRC),
        ])?;
        Ok(Self { tera })
    }

    pub fn render(&self, name: &str, context: &Context) -> Result<String, tera::Error> {
        let rendered = self.tera.render(name, context)?;
        log::debug!("Rendered prompt '{}' ({} chars)", name, rendered.len());
        Ok(rendered)
    }

    /// Shared system instruction for the documentation flows.
    pub fn scribe_system(&self) -> &'static str {
        SCRIBE_SYSTEM
    }
}

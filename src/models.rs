use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// Speaker of a single chat turn, serialised the way chat-completion APIs expect
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

// A single role-tagged message. A request is an ordered slice of these.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

// --- Simulated EHR records ---

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    // ISO date as entered by the clinician, e.g. "1984-02-17"
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    // Free-text past medical history
    #[serde(default)]
    pub medical_history: String,
}

// A single coded measurement or finding recorded against a patient
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub patient_id: Uuid,
    pub code: String, // e.g. "blood-pressure"
    pub value: String, // e.g. "128/84 mmHg"
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub patient_id: Uuid,
    pub transcript: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// The documentation produced for one encounter
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub patient_id: Uuid,
    pub encounter_id: Uuid,
    pub soap_note: String,
    #[serde(default)]
    pub billing_codes: Vec<crate::flows::BillingCode>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

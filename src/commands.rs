// Commands exposed to the CLI. Each one is the final catch point for errors
// and returns a user-facing message on failure.

use crate::flows::{BillingCodesInput, ChatInput, ChatTurn, SoapNoteInput, TranscriptionInput};
use crate::models::{Encounter, Note, Observation, Patient};
use crate::state::AppState;
use chrono::Utc;
use uuid::Uuid;

fn parse_patient_id(patient_id: &str) -> Result<Uuid, String> {
    let Ok(patient_uuid) = Uuid::parse_str(patient_id.trim()) else {
        let err_msg = format!("Invalid patient ID format: {}", patient_id);
        log::error!("{}", err_msg);
        return Err(err_msg);
    };
    Ok(patient_uuid)
}

// Medical history followed by recorded observations, as handed to the SOAP flow
fn patient_history(patient: &Patient, observations: &[Observation]) -> String {
    let mut history = patient.medical_history.trim().to_string();
    if !observations.is_empty() {
        if !history.is_empty() {
            history.push_str("\n\n");
        }
        history.push_str("Recorded observations:");
        for observation in observations {
            history.push_str(&format!(
                "\n- {}: {} ({})",
                observation.code,
                observation.value,
                observation.recorded_at.format("%Y-%m-%d")
            ));
        }
    }
    history
}

// --- Generation commands ---

pub async fn transcribe_audio(state: &AppState, audio_data_uri: String) -> Result<String, String> {
    log::info!("Requested transcription of {} chars of audio data", audio_data_uri.len());
    match state
        .generator
        .transcribe_patient_encounter(TranscriptionInput { audio_data_uri })
        .await
    {
        Ok(output) => Ok(output.transcript),
        Err(e) => {
            log::error!("Transcription failed: {:?}", e);
            Err(format!("Failed to transcribe audio: {}", e))
        }
    }
}

/// Drafts a SOAP note for the transcript, suggests billing codes, and saves
/// both the encounter and the note.
pub async fn document_encounter(state: &AppState, patient_id: String, transcript: String) -> Result<Note, String> {
    log::info!("Requested documentation of an encounter for patient {}", patient_id);
    let patient_uuid = parse_patient_id(&patient_id)?;

    // Hold the lock only while reading; generation can take a while
    let (patient, observations) = {
        let storage = state.storage.lock().await;
        let patient = match storage.get_patient(patient_uuid).await {
            Ok(Some(patient)) => patient,
            Ok(None) => return Err(format!("Patient {} not found", patient_uuid)),
            Err(e) => {
                log::error!("Failed to load patient {}: {:?}", patient_uuid, e);
                return Err(format!("Failed to load patient: {}", e));
            }
        };
        let observations = storage.list_observations(patient_uuid).await.map_err(|e| {
            log::error!("Failed to load observations for {}: {:?}", patient_uuid, e);
            format!("Failed to load observations: {}", e)
        })?;
        (patient, observations)
    };

    let soap = state
        .generator
        .generate_soap_note(SoapNoteInput {
            patient_id: patient.id.to_string(),
            encounter_transcript: transcript.clone(),
            patient_history: patient_history(&patient, &observations),
        })
        .await
        .map_err(|e| {
            log::error!("SOAP note generation failed for {}: {:?}", patient_uuid, e);
            format!("Failed to generate SOAP note: {}", e)
        })?;

    let billing_codes = match state
        .generator
        .generate_billing_codes(BillingCodesInput {
            soap_note: soap.soap_note.clone(),
        })
        .await
    {
        Ok(output) => output.billing_codes,
        Err(e) => {
            log::error!("Billing code generation failed, saving note without codes: {}", e);
            Vec::new()
        }
    };

    let encounter = Encounter {
        id: Uuid::new_v4(),
        patient_id: patient_uuid,
        transcript,
        created_at: Utc::now(),
    };
    let note = Note {
        id: Uuid::new_v4(),
        patient_id: patient_uuid,
        encounter_id: encounter.id,
        soap_note: soap.soap_note,
        billing_codes,
        created_at: Utc::now(),
    };

    let storage = state.storage.lock().await;
    match storage.save_documented_encounter(&encounter, &note).await {
        Ok(_) => Ok(note),
        Err(e) => {
            log::error!("Failed to save encounter and note for {}: {:?}", patient_uuid, e);
            Err(format!("Failed to save note: {}", e))
        }
    }
}

pub async fn ask_assistant(state: &AppState, message: String, history: Vec<ChatTurn>) -> Result<String, String> {
    log::info!("Assistant asked a question ({} prior turns)", history.len());
    match state.generator.chat(ChatInput { message, history }).await {
        Ok(output) => Ok(output.response),
        Err(e) => {
            log::error!("Assistant failed to answer: {:?}", e);
            Err(format!("Assistant is unavailable: {}", e))
        }
    }
}

// --- Patient record commands ---

pub async fn create_patient(
    state: &AppState,
    name: String,
    date_of_birth: Option<String>,
    gender: Option<String>,
    medical_history: String,
) -> Result<Patient, String> {
    if name.trim().is_empty() {
        return Err("Patient name cannot be empty.".to_string());
    }
    let patient = Patient {
        id: Uuid::new_v4(),
        name: name.trim().to_string(),
        date_of_birth,
        gender,
        medical_history,
    };

    let storage = state.storage.lock().await;
    match storage.create_patient(&patient).await {
        Ok(_) => Ok(patient),
        Err(e) => {
            log::error!("Failed to create patient: {:?}", e);
            Err(format!("Failed to create patient: {}", e))
        }
    }
}

pub async fn list_patients(state: &AppState) -> Result<Vec<Patient>, String> {
    let storage = state.storage.lock().await;
    storage.list_patients().await.map_err(|e| {
        log::error!("Failed to list patients: {:?}", e);
        format!("Failed to load patients: {}", e)
    })
}

pub async fn delete_patient(state: &AppState, patient_id: String) -> Result<(), String> {
    log::warn!("[CMD] Requested deletion of patient {}", patient_id);
    let patient_uuid = parse_patient_id(&patient_id)?;

    let storage = state.storage.lock().await;
    match storage.delete_patient(patient_uuid).await {
        Ok(_) => Ok(()),
        Err(e) => {
            log::error!("[CMD] Failed to delete patient {}: {:?}", patient_id, e);
            Err(format!("Failed to delete patient: {}", e))
        }
    }
}

pub async fn add_observation(
    state: &AppState,
    patient_id: String,
    code: String,
    value: String,
) -> Result<Observation, String> {
    let patient_uuid = parse_patient_id(&patient_id)?;
    if code.trim().is_empty() || value.trim().is_empty() {
        return Err("Observation code and value cannot be empty.".to_string());
    }
    let observation = Observation {
        id: Uuid::new_v4(),
        patient_id: patient_uuid,
        code: code.trim().to_string(),
        value: value.trim().to_string(),
        recorded_at: Utc::now(),
    };

    let storage = state.storage.lock().await;
    match storage.add_observation(&observation).await {
        Ok(_) => Ok(observation),
        Err(e) => {
            log::error!("Failed to add observation for {}: {:?}", patient_id, e);
            Err(format!("Failed to add observation: {}", e))
        }
    }
}

pub async fn list_notes(state: &AppState, patient_id: String) -> Result<Vec<Note>, String> {
    let patient_uuid = parse_patient_id(&patient_id)?;
    let storage = state.storage.lock().await;
    storage.list_notes_for_patient(patient_uuid).await.map_err(|e| {
        log::error!("Failed to list notes for {}: {:?}", patient_id, e);
        format!("Failed to load notes: {}", e)
    })
}

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Manage patient records
    #[command(subcommand)]
    Patient(PatientCommands),
    /// Record an observation for a patient
    Observe(ObserveArgs),
    /// Transcribe an encounter recording
    Transcribe(TranscribeArgs),
    /// Draft a SOAP note with billing codes and save it
    Document(DocumentArgs),
    /// List saved notes for a patient
    Notes(NotesArgs),
    /// Ask the clinical assistant a question
    Chat(ChatArgs),
    /// Print the resolved provider configuration
    Config,
}

#[derive(Subcommand)]
pub(crate) enum PatientCommands {
    Add(PatientAddArgs),
    List,
    Remove {
        #[arg(long)]
        id: String,
    },
}

#[derive(Args, Debug)]
pub(crate) struct PatientAddArgs {
    #[arg(long)]
    pub(crate) name: String,
    #[arg(long)]
    pub(crate) date_of_birth: Option<String>,
    #[arg(long)]
    pub(crate) gender: Option<String>,
    #[arg(long, default_value = "")]
    pub(crate) history: String,
}

#[derive(Args, Debug)]
pub(crate) struct ObserveArgs {
    #[arg(long)]
    pub(crate) patient: String,
    #[arg(long)]
    pub(crate) code: String,
    #[arg(long)]
    pub(crate) value: String,
}

#[derive(Args, Debug)]
pub(crate) struct TranscribeArgs {
    #[arg(long)]
    pub(crate) audio: PathBuf,
    /// Overrides the type guessed from the file extension
    #[arg(long)]
    pub(crate) mime: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct DocumentArgs {
    #[arg(long)]
    pub(crate) patient: String,
    #[arg(long)]
    pub(crate) transcript: PathBuf,
}

#[derive(Args, Debug)]
pub(crate) struct NotesArgs {
    #[arg(long)]
    pub(crate) patient: String,
}

#[derive(Args, Debug)]
pub(crate) struct ChatArgs {
    pub(crate) message: String,
    /// JSON array of prior turns: [{"role":"user","content":"..."}]
    #[arg(long)]
    pub(crate) history: Option<PathBuf>,
}

pub(crate) fn guess_audio_mime(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "ogg" | "oga" => "audio/ogg",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        _ => return None,
    };
    Some(mime)
}

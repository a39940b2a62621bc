// Declare the modules
pub mod api;
pub mod azure;
pub mod backend;
mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod flows;
pub mod managed;
pub mod models;
pub mod parse;
pub mod prompts;
pub mod retry;
pub mod state;
pub mod storage;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::Parser;
use serde::Serialize;

use backend::Generator;
use cli::{Cli, Commands, PatientCommands};
use config::AppConfig;
use flows::ChatTurn;
use state::AppState;
use storage::StorageManager;

pub fn run() -> anyhow::Result<()> {
    // An optional .env supplies provider settings in development
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Ok(path) = dotenv {
        log::debug!("Loaded environment from {}", path.display());
    }

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(execute(cli.command, config))
}

async fn execute(command: Commands, config: AppConfig) -> anyhow::Result<()> {
    if let Commands::Config = command {
        println!("{config}");
        return Ok(());
    }

    let storage_manager = StorageManager::connect(&config.database_url).await?;
    let generator = Generator::from_config(&config).context("Failed to load prompt templates")?;
    log::info!("Using {} generation backend", generator.backend().name());
    let state = AppState::new(storage_manager, generator);

    match command {
        Commands::Patient(PatientCommands::Add(args)) => {
            let patient = commands::create_patient(
                &state,
                args.name,
                args.date_of_birth,
                args.gender,
                args.history,
            )
            .await
            .map_err(anyhow::Error::msg)?;
            print_json(&patient)
        }
        Commands::Patient(PatientCommands::List) => {
            let patients = commands::list_patients(&state).await.map_err(anyhow::Error::msg)?;
            print_json(&patients)
        }
        Commands::Patient(PatientCommands::Remove { id }) => {
            commands::delete_patient(&state, id).await.map_err(anyhow::Error::msg)
        }
        Commands::Observe(args) => {
            let observation = commands::add_observation(&state, args.patient, args.code, args.value)
                .await
                .map_err(anyhow::Error::msg)?;
            print_json(&observation)
        }
        Commands::Transcribe(args) => {
            let mime = match args.mime {
                Some(mime) => mime,
                None => cli::guess_audio_mime(&args.audio)
                    .map(str::to_string)
                    .with_context(|| format!("Cannot tell the audio type of {}; pass --mime", args.audio.display()))?,
            };
            let audio = tokio::fs::read(&args.audio)
                .await
                .with_context(|| format!("Failed to read {}", args.audio.display()))?;
            let data_uri = format!("data:{};base64,{}", mime, STANDARD.encode(audio));
            let transcript = commands::transcribe_audio(&state, data_uri)
                .await
                .map_err(anyhow::Error::msg)?;
            println!("{transcript}");
            Ok(())
        }
        Commands::Document(args) => {
            let transcript = tokio::fs::read_to_string(&args.transcript)
                .await
                .with_context(|| format!("Failed to read {}", args.transcript.display()))?;
            let note = commands::document_encounter(&state, args.patient, transcript)
                .await
                .map_err(anyhow::Error::msg)?;
            print_json(&note)
        }
        Commands::Notes(args) => {
            let notes = commands::list_notes(&state, args.patient)
                .await
                .map_err(anyhow::Error::msg)?;
            print_json(&notes)
        }
        Commands::Chat(args) => {
            let history: Vec<ChatTurn> = match args.history {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    serde_json::from_str(&raw).context("Chat history must be a JSON array of turns")?
                }
                None => Vec::new(),
            };
            let reply = commands::ask_assistant(&state, args.message, history)
                .await
                .map_err(anyhow::Error::msg)?;
            println!("{reply}");
            Ok(())
        }
        Commands::Config => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

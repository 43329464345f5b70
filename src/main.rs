//! voice-assistant-rs: a conversational front end for a local Ollama server
//! with spoken replies.

mod api;
mod config;
mod connection;
mod conversation;
mod inference;
mod ollama;
mod service;
mod settings;
mod speech;
mod voice;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::SpeechConfig;
use crate::settings::{FileStore, MemoryStore, SettingChange, SettingsStore};
use crate::speech::espeak::EspeakPlatform;
use crate::speech::{SilentPlatform, SpeechController, SpeechPlatform, VoiceConfig};

#[derive(Parser, Debug)]
#[command(name = "voice-assistant-rs", about = "Voice assistant for a local Ollama server")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Treat typed input as spoken, so replies are read aloud
    #[arg(long)]
    voice: bool,

    /// Disable audio output (replies are still logged)
    #[arg(long)]
    no_speech: bool,

    /// Do not start the HTTP control API
    #[arg(long)]
    no_api: bool,

    /// Keep settings in memory only (nothing is written to disk)
    #[arg(long)]
    no_persist: bool,
}

fn speech_platform(config: &SpeechConfig, disabled: bool) -> Arc<dyn SpeechPlatform> {
    if disabled || config.backend == "silent" {
        info!("Speech output disabled");
        return Arc::new(SilentPlatform);
    }
    if config.backend != "espeak" {
        warn!("Unknown speech backend '{}', using silent output", config.backend);
        return Arc::new(SilentPlatform);
    }
    match EspeakPlatform::new(&config.command) {
        Ok(platform) => Arc::new(platform),
        Err(e) => {
            warn!("Speech unavailable ({e}), using silent output");
            Arc::new(SilentPlatform)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("voice-assistant-rs starting");

    let config = config::Config::load(args.config.as_deref());
    info!("Ollama: {} (model {})", config.ollama.host, config.ollama.model);

    // Settings
    let settings = if args.no_persist {
        info!("Settings kept in memory only");
        Arc::new(SettingsStore::open(MemoryStore::default()))
    } else {
        let settings_dir = config.settings.resolved_dir();
        info!("Settings directory: {}", settings_dir.display());
        Arc::new(SettingsStore::open(FileStore::new(settings_dir)))
    };

    // Speech
    let platform = speech_platform(&config.speech, args.no_speech);
    let speech = Arc::new(SpeechController::new(
        platform,
        VoiceConfig::from_settings(&settings.snapshot()),
    ));

    let current_voice = settings.snapshot().selected_voice_name;
    if let Some(name) = voice::reconcile_preference(&current_voice, &speech.voices()) {
        info!("Voice '{current_voice}' not installed, switching to '{name}'");
        if let Err(e) = settings.update(SettingChange::SelectedVoiceName(name)) {
            warn!("Failed to store voice preference: {e}");
        }
    }

    {
        let mut rx = settings.subscribe();
        let speech = speech.clone();
        speech.set_base_config(VoiceConfig::from_settings(&rx.borrow_and_update()));
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let config = VoiceConfig::from_settings(&rx.borrow_and_update());
                speech.set_base_config(config);
            }
        });
    }

    // Ollama
    let client = Arc::new(ollama::OllamaClient::new(
        &config.ollama.host,
        Duration::from_secs(config.ollama.probe_timeout_secs),
    ));
    let connection = Arc::new(connection::ConnectionMonitor::new(
        client.clone(),
        &config.ollama.model,
    ));
    connection.spawn_polling(Duration::from_secs(config.connection.poll_interval_secs.max(1)));

    let responder = Arc::new(inference::Responder::new(
        client,
        connection.clone(),
        ollama::GenerateOptions {
            temperature: config.ollama.temperature,
            top_p: config.ollama.top_p,
        },
    ));
    let conversation = Arc::new(conversation::Conversation::new(
        responder,
        speech.clone(),
        settings.clone(),
    ));

    // Control API
    if config.api.enabled && !args.no_api {
        let state = api::ApiState {
            conversation: conversation.clone(),
            speech: speech.clone(),
            settings: settings.clone(),
            connection: connection.clone(),
        };
        api::start_api(state, config.api.port).await;
    }

    let service = service::AssistantService::new(
        conversation,
        speech,
        settings,
        connection,
        args.voice,
    );
    service.run().await?;

    info!("voice-assistant-rs stopped");
    Ok(())
}

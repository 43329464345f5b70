//! assistant-ctl: command-line client for the voice assistant control API.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "assistant-ctl", about = "Control a running voice assistant")]
struct Args {
    /// Control API base URL
    #[arg(long, default_value = "http://127.0.0.1:8768")]
    api: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Show connection, model and speech state
    Status,
    /// Ask a question and print the reply
    Ask {
        text: Vec<String>,
        /// Read the reply aloud (if auto-speak is enabled)
        #[arg(long)]
        speak: bool,
    },
    /// Stop speaking
    Stop,
    /// Speak text without asking the model
    Say {
        text: Vec<String>,
        /// Return only after playback ends
        #[arg(long)]
        wait: bool,
    },
}

// --- Control API types ---

#[derive(Serialize)]
struct SubmitRequest {
    text: String,
    speak: bool,
}

#[derive(Serialize)]
struct SpeakRequest {
    text: String,
    wait: bool,
}

#[derive(Deserialize)]
struct StatusResponse {
    connected: bool,
    host: String,
    model: String,
    processing: bool,
    speech: String,
    messages: usize,
}

#[derive(Deserialize)]
struct MessageResponse {
    content: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, String> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let detail = resp
        .json::<ErrorResponse>()
        .await
        .ok()
        .and_then(|e| e.error)
        .unwrap_or_else(|| status.to_string());
    Err(detail)
}

async fn run(client: &Client, api: &str, command: Cmd) -> Result<(), String> {
    match command {
        Cmd::Status => {
            let resp = client
                .get(format!("{api}/status"))
                .send()
                .await
                .map_err(|e| format!("Assistant not reachable at {api}: {e}"))?;
            let status: StatusResponse = check(resp)
                .await?
                .json()
                .await
                .map_err(|e| format!("Bad status response: {e}"))?;
            println!(
                "Ollama:     {} ({})",
                if status.connected { "connected" } else { "disconnected" },
                status.host
            );
            println!("Model:      {}", status.model);
            println!("Speech:     {}", status.speech.to_uppercase());
            println!("Processing: {}", status.processing);
            println!("Messages:   {}", status.messages);
        }
        Cmd::Ask { text, speak } => {
            let text = text.join(" ");
            if text.trim().is_empty() {
                return Err("Nothing to ask".into());
            }
            let resp = client
                .post(format!("{api}/submit"))
                .json(&SubmitRequest { text, speak })
                .send()
                .await
                .map_err(|e| format!("Request failed: {e}"))?;
            let reply: MessageResponse = check(resp)
                .await?
                .json()
                .await
                .map_err(|e| format!("Bad reply: {e}"))?;
            println!("{}", reply.content);
        }
        Cmd::Stop => {
            let resp = client
                .post(format!("{api}/stop"))
                .send()
                .await
                .map_err(|e| format!("Request failed: {e}"))?;
            check(resp).await?;
        }
        Cmd::Say { text, wait } => {
            let resp = client
                .post(format!("{api}/speak"))
                .json(&SpeakRequest {
                    text: text.join(" "),
                    wait,
                })
                .send()
                .await
                .map_err(|e| format!("Request failed: {e}"))?;
            check(resp).await?;
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    let api = args.api.trim_end_matches('/').to_string();

    // Completions can take a while on a cold model.
    let client = Client::builder()
        .connect_timeout(Duration::from_millis(500))
        .timeout(Duration::from_secs(180))
        .build()
        .unwrap_or_else(|_| Client::new());

    match run(&client, &api, args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

//! Question answering on top of the Ollama client.
//!
//! Never fails: connectivity problems come back as guidance text so the
//! conversation can show them like any other reply.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::connection::ConnectionMonitor;
use crate::ollama::{GenerateOptions, OllamaClient};

const PROMPT_TEMPLATE: &str = "You are an AI assistant. Answer all questions in a short, clear, and direct manner. Avoid unnecessary explanations and only provide the most useful information. Keep answers under 2–3 sentences unless absolutely necessary. Question: {input}";

const NO_RESPONSE: &str = "I could not process your request.";
const EMPTY_RESPONSE: &str = "I could not generate a response.";

static FILLER_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(Well,|So,|Actually,)\s*").expect("filler prefix pattern is valid")
});

pub fn build_prompt(input: &str) -> String {
    PROMPT_TEMPLATE.replace("{input}", input)
}

/// Strip one leading filler word and surrounding whitespace.
pub fn clean_response(raw: Option<&str>) -> String {
    let raw = raw.filter(|r| !r.is_empty()).unwrap_or(NO_RESPONSE);
    let cleaned = FILLER_PREFIX.replace(raw, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        EMPTY_RESPONSE.to_string()
    } else {
        cleaned.to_string()
    }
}

fn setup_steps(host: &str, model: &str) -> String {
    format!(
        "Please ensure:\n\n\
         1. Ollama is installed and running locally\n\
         2. Run: ollama serve\n\
         3. Download a model: ollama pull {model}\n\
         4. Ollama is accessible at {host}\n\n\
         Once setup is complete, try your question again."
    )
}

pub fn not_connected_message(host: &str, model: &str) -> String {
    format!("Ollama is not connected. {}", setup_steps(host, model))
}

pub fn cannot_connect_message(host: &str, model: &str) -> String {
    format!("Cannot connect to Ollama. {}", setup_steps(host, model))
}

pub struct Responder {
    client: Arc<OllamaClient>,
    connection: Arc<ConnectionMonitor>,
    options: GenerateOptions,
}

impl Responder {
    pub fn new(
        client: Arc<OllamaClient>,
        connection: Arc<ConnectionMonitor>,
        options: GenerateOptions,
    ) -> Self {
        Self {
            client,
            connection,
            options,
        }
    }

    /// Answer `input` with the selected model, or explain why that is not
    /// possible right now.
    pub async fn ask(&self, input: &str) -> String {
        let model = self.connection.selected_model();
        let host = self.connection.host();

        if !self.connection.is_connected() {
            info!("Not connected, replying with setup guidance");
            return not_connected_message(host, &model);
        }

        match self
            .client
            .generate(&model, &build_prompt(input), self.options)
            .await
        {
            Ok(raw) => {
                let reply = clean_response(raw.as_deref());
                debug!("Ollama output: '{reply}'");
                reply
            }
            Err(e) => {
                warn!("Ollama request failed: {e}");
                cannot_connect_message(host, &model)
            }
        }
    }
}

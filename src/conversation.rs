//! Conversation orchestration.
//!
//! IDLE → PROCESSING → IDLE
//!
//! Each submission appends the user message, asks the model, appends the
//! reply, and optionally speaks it. The log is append-only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::inference::Responder;
use crate::settings::SettingsStore;
use crate::speech::SpeechController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: u64,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("nothing to send")]
    EmptyInput,

    #[error("still processing the previous message")]
    Busy,
}

/// Clears the processing flag even if the submission future is dropped.
struct ProcessingGuard<'a>(&'a watch::Sender<bool>);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
        info!("State: PROCESSING → IDLE");
    }
}

pub struct Conversation {
    responder: Arc<Responder>,
    speech: Arc<SpeechController>,
    settings: Arc<SettingsStore>,
    messages: Mutex<Vec<Message>>,
    next_id: AtomicU64,
    processing: watch::Sender<bool>,
}

impl Conversation {
    pub fn new(
        responder: Arc<Responder>,
        speech: Arc<SpeechController>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        let (processing, _rx) = watch::channel(false);
        Self {
            responder,
            speech,
            settings,
            messages: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            processing,
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_processing(&self) -> bool {
        *self.processing.borrow()
    }

    #[cfg(test)]
    pub fn subscribe_processing(&self) -> watch::Receiver<bool> {
        self.processing.subscribe()
    }

    fn append(&self, role: Role, content: &str) -> Message {
        let message = Message {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            role,
            content: content.to_string(),
            timestamp: Local::now(),
        };
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        message
    }

    /// Send `text` to the model and record the exchange. Returns the
    /// assistant message.
    ///
    /// `speak_result` marks input that arrived by voice; the reply is spoken
    /// only if that is set and auto-speak is enabled.
    pub async fn submit(&self, text: &str, speak_result: bool) -> Result<Message, SubmitError> {
        if text.trim().is_empty() {
            return Err(SubmitError::EmptyInput);
        }
        if self.processing.send_replace(true) {
            return Err(SubmitError::Busy);
        }

        let reply = {
            let _guard = ProcessingGuard(&self.processing);
            info!("State: IDLE → PROCESSING");

            self.append(Role::User, text);
            let reply = self.responder.ask(text).await;
            self.append(Role::Assistant, &reply)
        };

        if speak_result && self.settings.snapshot().auto_speak && !reply.content.is_empty() {
            self.speech.speak(&reply.content, None);
        } else {
            debug!("Not speaking reply (voice input: {speak_result})");
        }

        Ok(reply)
    }
}

//! Ollama connectivity polling.
//!
//! DISCONNECTED ⇄ CONNECTED, driven by `/api/tags` probes on a fixed
//! interval plus manual refreshes. Probes may overlap; each takes a sequence
//! number and only the most recently issued one is allowed to update state.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::ollama::{InferenceError, ModelInfo, OllamaClient};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    /// Always empty while disconnected.
    pub models: Vec<ModelInfo>,
    /// Kept across disconnects so it can be reused on reconnect.
    pub selected_model: String,
    pub checking: bool,
}

impl ConnectionState {
    fn apply_connected(&mut self, models: Vec<ModelInfo>) {
        if !self.connected {
            info!("Ollama connected ({} models)", models.len());
        }
        self.connected = true;
        self.models = models;

        let known = self.models.iter().any(|m| m.name == self.selected_model);
        if let Some(first) = self.models.first().filter(|_| !known) {
            if self.selected_model.is_empty() {
                info!("Selecting model '{}'", first.name);
            } else {
                info!(
                    "Model '{}' not installed, selecting '{}'",
                    self.selected_model, first.name
                );
            }
            self.selected_model = first.name.clone();
        }
    }

    fn apply_disconnected(&mut self, reason: &InferenceError) {
        if self.connected {
            warn!("Ollama disconnected: {reason}");
        } else {
            debug!("Ollama still unreachable: {reason}");
        }
        self.connected = false;
        self.models.clear();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelSelectError {
    #[error("model name is empty")]
    Empty,

    #[error("model '{0}' is not installed")]
    NotInstalled(String),
}

pub struct ConnectionMonitor {
    client: Arc<OllamaClient>,
    state: watch::Sender<ConnectionState>,
    issued: AtomicU64,
    in_flight: AtomicUsize,
}

impl ConnectionMonitor {
    pub fn new(client: Arc<OllamaClient>, selected_model: &str) -> Self {
        let (state, _rx) = watch::channel(ConnectionState {
            selected_model: selected_model.to_string(),
            ..Default::default()
        });
        Self {
            client,
            state,
            issued: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    pub fn selected_model(&self) -> String {
        self.state.borrow().selected_model.clone()
    }

    pub fn host(&self) -> &str {
        self.client.host()
    }

    /// Choose the model used for completions. While models are known the
    /// name must be one of them.
    pub fn select_model(&self, name: &str) -> Result<(), ModelSelectError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ModelSelectError::Empty);
        }

        let mut result = Ok(());
        self.state.send_if_modified(|s| {
            if !s.models.is_empty() && !s.models.iter().any(|m| m.name == name) {
                result = Err(ModelSelectError::NotInstalled(name.to_string()));
                return false;
            }
            if s.selected_model == name {
                return false;
            }
            info!("Model selected: {name}");
            s.selected_model = name.to_string();
            true
        });
        result
    }

    /// Probe the server once and update state. Returns whether the server
    /// is considered connected afterwards.
    pub async fn check(&self) -> bool {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|s| s.checking = true);

        let result = self.client.list_models().await;

        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        let latest = self.issued.load(Ordering::SeqCst) == seq;

        self.state.send_modify(|s| {
            s.checking = remaining > 0;
            if !latest {
                debug!("Discarding stale probe #{seq}");
                return;
            }
            match result {
                Ok(models) => s.apply_connected(models),
                Err(e) => s.apply_disconnected(&e),
            }
        });

        self.is_connected()
    }

    /// Manual probe outside the polling cadence.
    pub async fn refresh(&self) -> bool {
        info!("Manual connection refresh");
        self.check().await
    }

    /// Probe immediately, then every `every`.
    pub fn spawn_polling(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.check().await;
            }
        })
    }
}

//! Speech output controller.
//!
//! IDLE → SPEAKING → IDLE
//!
//! At most one utterance is active. A new `speak` pre-empts the previous one,
//! and lifecycle events from a superseded utterance are ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::platform::{SpeechPlatform, Utterance};
use crate::settings::Settings;
use crate::voice;

const FALLBACK_RATE: f32 = 0.85;
const FALLBACK_PITCH: f32 = 1.1;
const FALLBACK_VOLUME: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechState {
    Idle,
    Speaking,
}

impl std::fmt::Display for SpeechState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Speaking => write!(f, "SPEAKING"),
        }
    }
}

/// Partial voice configuration. Unset fields fall through to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub voice_name: Option<String>,
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub volume: Option<f32>,
}

impl VoiceConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            voice_name: Some(settings.selected_voice_name.clone()),
            rate: Some(settings.voice_speed),
            pitch: Some(settings.voice_pitch),
            volume: Some(settings.voice_volume),
        }
    }

    /// `self` layered over `base`.
    pub fn merged_over(self, base: &VoiceConfig) -> Self {
        Self {
            voice_name: self.voice_name.or_else(|| base.voice_name.clone()),
            rate: self.rate.or(base.rate),
            pitch: self.pitch.or(base.pitch),
            volume: self.volume.or(base.volume),
        }
    }
}

struct PlaybackShared {
    /// Id of the utterance allowed to drive the state. 0 before the first.
    /// Held while the state is sent so a check and its transition are atomic.
    current: Mutex<u64>,
    state: watch::Sender<SpeechState>,
}

impl PlaybackShared {
    fn transition(&self, next: SpeechState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!("State: {prev} → {next}");
        }
    }

    /// Make `id` the current utterance and force idle.
    fn retire_to(&self, id: u64) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = id;
        self.transition(SpeechState::Idle);
    }

    /// Apply `next` only if `id` is still current. Returns whether it was.
    fn transition_if_current(&self, id: u64, next: SpeechState) -> bool {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != id {
            return false;
        }
        self.transition(next);
        true
    }
}

/// Handle a [`SpeechPlatform`] uses to report one utterance's lifecycle.
#[derive(Clone)]
pub struct PlaybackObserver {
    id: u64,
    shared: Arc<PlaybackShared>,
}

impl PlaybackObserver {
    pub fn started(&self) {
        if !self.shared.transition_if_current(self.id, SpeechState::Speaking) {
            debug!("Ignoring start of superseded utterance #{}", self.id);
        }
    }

    pub fn finished(&self) {
        self.shared.transition_if_current(self.id, SpeechState::Idle);
    }

    pub fn failed(&self, reason: &str) {
        if self.shared.transition_if_current(self.id, SpeechState::Idle) {
            warn!("Playback of utterance #{} failed: {reason}", self.id);
        }
    }
}

pub struct SpeechController {
    platform: Arc<dyn SpeechPlatform>,
    base: Mutex<VoiceConfig>,
    shared: Arc<PlaybackShared>,
    next_id: AtomicU64,
}

impl SpeechController {
    pub fn new(platform: Arc<dyn SpeechPlatform>, base: VoiceConfig) -> Self {
        let (state, _rx) = watch::channel(SpeechState::Idle);
        Self {
            platform,
            base: Mutex::new(base),
            shared: Arc::new(PlaybackShared {
                current: Mutex::new(0),
                state,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_base_config(&self, config: VoiceConfig) {
        *self.base.lock().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn state(&self) -> SpeechState {
        *self.shared.state.borrow()
    }

    pub fn is_speaking(&self) -> bool {
        self.state() == SpeechState::Speaking
    }

    pub fn subscribe(&self) -> watch::Receiver<SpeechState> {
        self.shared.state.subscribe()
    }

    pub fn voices(&self) -> Vec<voice::VoiceDescriptor> {
        self.platform.voices()
    }

    /// Speak `text`, replacing anything currently playing. Blank text only
    /// stops the current utterance.
    ///
    /// Failures are logged and leave the controller idle; they never reach
    /// the caller.
    pub fn speak(&self, text: &str, config_override: Option<VoiceConfig>) {
        if text.trim().is_empty() {
            debug!("Empty text, nothing to speak");
            self.stop();
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.retire_to(id);
        self.platform.cancel();

        let base = self.base.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let config = config_override.unwrap_or_default().merged_over(&base);

        let voices = self.platform.voices();
        let voice = voice::resolve(config.voice_name.as_deref(), &voices).cloned();
        match &voice {
            Some(v) => debug!("Using voice: {} ({})", v.name, v.lang),
            None => debug!("No matching voice, using platform default"),
        }

        let utterance = Utterance {
            text: text.to_string(),
            voice,
            rate: config.rate.unwrap_or(FALLBACK_RATE),
            pitch: config.pitch.unwrap_or(FALLBACK_PITCH),
            volume: config.volume.unwrap_or(FALLBACK_VOLUME),
        };

        let observer = PlaybackObserver {
            id,
            shared: self.shared.clone(),
        };
        if let Err(e) = self.platform.speak(utterance, observer.clone()) {
            observer.failed(&e.to_string());
        }
    }

    /// Cancel playback and force idle. No-op when already idle.
    pub fn stop(&self) {
        // Retire the active utterance so its late events are ignored.
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.retire_to(id);
        self.platform.cancel();
    }
}

//! Speech platform capability.

use tracing::info;

use super::controller::PlaybackObserver;
use crate::voice::VoiceDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("speech platform error: {0}")]
    Platform(String),

    #[error("speech process error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully resolved playback request.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    /// `None` plays with the platform default voice.
    pub voice: Option<VoiceDescriptor>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

/// What a text-to-speech backend must provide.
///
/// `speak` reports lifecycle through the observer: `started` once audio
/// begins, then exactly one of `finished` or `failed`. Implementations may
/// call the observer from any thread.
pub trait SpeechPlatform: Send + Sync {
    fn voices(&self) -> Vec<VoiceDescriptor>;

    fn speak(&self, utterance: Utterance, observer: PlaybackObserver) -> Result<(), SpeechError>;

    /// Stop whatever is playing. Must be safe to call when idle.
    fn cancel(&self);
}

/// Backend with no audio output. Logs the text and completes immediately.
#[derive(Debug, Default)]
pub struct SilentPlatform;

impl SpeechPlatform for SilentPlatform {
    fn voices(&self) -> Vec<VoiceDescriptor> {
        Vec::new()
    }

    fn speak(&self, utterance: Utterance, observer: PlaybackObserver) -> Result<(), SpeechError> {
        observer.started();
        info!("(silent) {}", utterance.text);
        observer.finished();
        Ok(())
    }

    fn cancel(&self) {}
}

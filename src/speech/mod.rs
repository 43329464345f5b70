//! Speech output.
//!
//! Components:
//! - `controller`: single-utterance playback with pre-emption and idle/speaking state
//! - `platform`: the capability a speech backend implements, plus a silent backend
//! - `espeak`: `espeak-ng` subprocess backend

pub mod controller;
pub mod espeak;
pub mod platform;

pub use controller::{SpeechController, SpeechState, VoiceConfig};
pub use platform::{SilentPlatform, SpeechPlatform};

#[cfg(test)]
pub(crate) mod testing;

//! Voice selection.
//!
//! Picks a voice from whatever the speech platform reports, honouring an
//! explicit choice first and then falling back through well-known English
//! voices.

use serde::{Deserialize, Serialize};

/// Named voices tried in order when the requested voice is missing.
pub const PREFERRED_VOICES: [&str; 7] = [
    "Samantha", "Alex", "Ava", "Allison", "Susan", "Victoria", "Karen",
];

/// Name fragments that usually mark a higher quality voice.
pub const QUALITY_MARKERS: [&str; 4] = ["Premium", "Enhanced", "Natural", "Neural"];

/// A voice offered by the speech platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceDescriptor {
    pub name: String,
    pub lang: String,
}

impl VoiceDescriptor {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }

    pub fn is_english(&self) -> bool {
        self.lang.starts_with("en")
    }
}

/// Resolve the voice to use for playback.
///
/// 1. exact match on `preferred`
/// 2. first English voice containing a [`PREFERRED_VOICES`] name, in list order
/// 3. first English voice containing a [`QUALITY_MARKERS`] fragment
/// 4. first English voice
///
/// `None` means the platform default voice should be used.
pub fn resolve<'a>(
    preferred: Option<&str>,
    voices: &'a [VoiceDescriptor],
) -> Option<&'a VoiceDescriptor> {
    if let Some(name) = preferred.filter(|n| !n.is_empty()) {
        if let Some(voice) = voices.iter().find(|v| v.name == name) {
            return Some(voice);
        }
    }

    PREFERRED_VOICES
        .iter()
        .find_map(|wanted| {
            voices
                .iter()
                .find(|v| v.is_english() && v.name.contains(wanted))
        })
        .or_else(|| {
            voices.iter().find(|v| {
                v.is_english() && QUALITY_MARKERS.iter().any(|m| v.name.contains(m))
            })
        })
        .or_else(|| voices.iter().find(|v| v.is_english()))
}

pub fn english_voices(voices: &[VoiceDescriptor]) -> Vec<VoiceDescriptor> {
    voices.iter().filter(|v| v.is_english()).cloned().collect()
}

/// Replacement for a stored voice preference that no installed English voice
/// matches. Returns `None` when the preference is fine or no English voice
/// exists at all.
pub fn reconcile_preference(current: &str, voices: &[VoiceDescriptor]) -> Option<String> {
    let english = english_voices(voices);
    if english.is_empty() || english.iter().any(|v| v.name == current) {
        return None;
    }

    english
        .iter()
        .find(|v| v.name.contains("Samantha"))
        .or_else(|| english.first())
        .map(|v| v.name.clone())
}

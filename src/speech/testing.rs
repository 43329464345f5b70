//! In-memory speech platform for tests.

use std::sync::Mutex;

use super::controller::PlaybackObserver;
use super::platform::{SpeechError, SpeechPlatform, Utterance};
use crate::voice::VoiceDescriptor;

/// Records every call and hands observers back to the test so it can drive
/// lifecycle events by hand.
#[derive(Default)]
pub struct FakePlatform {
    pub voices: Vec<VoiceDescriptor>,
    /// Report `started` as soon as `speak` is called.
    pub auto_start: bool,
    /// Make `speak` fail up front.
    pub refuse: bool,
    pub log: Mutex<Vec<String>>,
    pub spoken: Mutex<Vec<(Utterance, PlaybackObserver)>>,
}

impl FakePlatform {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(u, _)| u.text.clone())
            .collect()
    }

    pub fn observer(&self, index: usize) -> PlaybackObserver {
        self.spoken.lock().unwrap()[index].1.clone()
    }

    pub fn utterance(&self, index: usize) -> Utterance {
        self.spoken.lock().unwrap()[index].0.clone()
    }
}

impl SpeechPlatform for FakePlatform {
    fn voices(&self) -> Vec<VoiceDescriptor> {
        self.voices.clone()
    }

    fn speak(&self, utterance: Utterance, observer: PlaybackObserver) -> Result<(), SpeechError> {
        self.log.lock().unwrap().push(format!("speak:{}", utterance.text));
        if self.refuse {
            return Err(SpeechError::Platform("device busy".into()));
        }
        if self.auto_start {
            observer.started();
        }
        self.spoken.lock().unwrap().push((utterance, observer));
        Ok(())
    }

    fn cancel(&self) {
        self.log.lock().unwrap().push("cancel".into());
    }
}

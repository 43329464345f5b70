//! `espeak-ng` backend.
//!
//! Each utterance is one child process. Cancelling kills the child; a watcher
//! thread polls the child and reports the end of playback.

use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::controller::PlaybackObserver;
use super::platform::{SpeechError, SpeechPlatform, Utterance};
use crate::voice::VoiceDescriptor;

const BASE_WPM: f32 = 175.0;
const BASE_PITCH: f32 = 50.0;
const BASE_AMPLITUDE: f32 = 100.0;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
struct EspeakVoice {
    descriptor: VoiceDescriptor,
    /// Value passed to `-v`.
    file: String,
}

pub struct EspeakPlatform {
    program: String,
    /// Extra words from the configured command, passed before our own flags.
    base_args: Vec<String>,
    voices: Vec<EspeakVoice>,
    active: Arc<Mutex<Option<Child>>>,
}

impl EspeakPlatform {
    /// Probe the binary and read its voice list. `command` may carry extra
    /// flags after the program name (`espeak-ng -g 4`).
    pub fn new(command: &str) -> Result<Self, SpeechError> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| SpeechError::Platform("empty speech command".into()))?;
        let base_args: Vec<String> = words.collect();

        let output = Command::new(&program)
            .args(&base_args)
            .arg("--voices")
            .stderr(Stdio::null())
            .output()?;

        if !output.status.success() {
            return Err(SpeechError::Platform(format!(
                "{command} --voices exited with {}",
                output.status
            )));
        }

        let voices = parse_voice_list(&String::from_utf8_lossy(&output.stdout));
        info!("{command}: {} voices available", voices.len());

        Ok(Self {
            program,
            base_args,
            voices,
            active: Arc::new(Mutex::new(None)),
        })
    }

    fn voice_file(&self, voice: &VoiceDescriptor) -> Option<&str> {
        self.voices
            .iter()
            .find(|v| v.descriptor == *voice)
            .map(|v| v.file.as_str())
    }
}

impl SpeechPlatform for EspeakPlatform {
    fn voices(&self) -> Vec<VoiceDescriptor> {
        self.voices.iter().map(|v| v.descriptor.clone()).collect()
    }

    fn speak(&self, utterance: Utterance, observer: PlaybackObserver) -> Result<(), SpeechError> {
        let file = utterance.voice.as_ref().and_then(|v| self.voice_file(v));
        let args = espeak_args(&utterance, file);
        debug!("Running {} {:?}", self.program, &args[..args.len() - 1]);

        let child = Command::new(&self.program)
            .args(&self.base_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let pid = child.id();

        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);
        observer.started();

        let active = self.active.clone();
        std::thread::spawn(move || watch_child(&active, pid, &observer));
        Ok(())
    }

    fn cancel(&self) {
        if let Some(mut child) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            if let Err(e) = child.kill() {
                debug!("espeak child already gone: {e}");
            }
            let _ = child.wait();
            info!("Speech cancelled");
        }
    }
}

/// Poll the child with `pid` until it exits or is taken away by `cancel`.
fn watch_child(active: &Mutex<Option<Child>>, pid: u32, observer: &PlaybackObserver) {
    loop {
        let outcome = {
            let mut slot = active.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(child) = slot.as_mut().filter(|c| c.id() == pid) else {
                // Cancelled or replaced by a newer utterance.
                return;
            };
            match child.try_wait() {
                Ok(None) => None,
                Ok(Some(status)) => {
                    slot.take();
                    Some(if status.success() {
                        Ok(())
                    } else {
                        Err(format!("espeak exited with {status}"))
                    })
                }
                Err(e) => {
                    slot.take();
                    Some(Err(format!("failed to poll espeak: {e}")))
                }
            }
        };

        match outcome {
            None => std::thread::sleep(POLL_INTERVAL),
            Some(Ok(())) => {
                observer.finished();
                return;
            }
            Some(Err(reason)) => {
                warn!("{reason}");
                observer.failed(&reason);
                return;
            }
        }
    }
}

/// Command-line arguments for one utterance. The text is always last.
fn espeak_args(utterance: &Utterance, voice_file: Option<&str>) -> Vec<String> {
    let wpm = (BASE_WPM * utterance.rate).round().clamp(80.0, 450.0) as u32;
    let pitch = (BASE_PITCH * utterance.pitch).round().clamp(0.0, 99.0) as u32;
    let amplitude = (BASE_AMPLITUDE * utterance.volume).round().clamp(0.0, 200.0) as u32;

    let mut args = Vec::with_capacity(9);
    if let Some(file) = voice_file {
        args.push("-v".to_string());
        args.push(file.to_string());
    }
    args.extend([
        "-s".to_string(),
        wpm.to_string(),
        "-p".to_string(),
        pitch.to_string(),
        "-a".to_string(),
        amplitude.to_string(),
        "--".to_string(),
        utterance.text.clone(),
    ]);
    args
}

/// Parse `espeak-ng --voices` output.
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US            (en 3)
/// ```
fn parse_voice_list(output: &str) -> Vec<EspeakVoice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 {
                return None;
            }
            Some(EspeakVoice {
                descriptor: VoiceDescriptor::new(cols[3].replace('_', " "), cols[1]),
                file: cols[4].to_string(),
            })
        })
        .collect()
}

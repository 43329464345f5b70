//! Persisted user preferences.
//!
//! The whole record is stored as one JSON object under a fixed key and
//! re-written on every change. Loading merges whatever is stored over the
//! compiled-in defaults one field at a time, so a damaged file only costs the
//! fields that cannot be read.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Storage key for the settings record.
pub const SETTINGS_KEY: &str = "ollama-voice-assistant-settings";

pub const SPEED_RANGE: RangeInclusive<f32> = 0.5..=2.0;
pub const PITCH_RANGE: RangeInclusive<f32> = 0.5..=2.0;
pub const VOLUME_RANGE: RangeInclusive<f32> = 0.0..=1.0;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("unknown setting: {0}")]
    UnknownField(String),

    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: String, value: String },

    #[error("settings storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Fixed accent palette.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeColor {
    #[default]
    Purple,
    Blue,
    Green,
    Orange,
    Teal,
}

impl ThemeColor {
    pub const ALL: [Self; 5] = [
        Self::Purple,
        Self::Blue,
        Self::Green,
        Self::Orange,
        Self::Teal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purple => "purple",
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Orange => "orange",
            Self::Teal => "teal",
        }
    }

    /// ANSI foreground escape used by the terminal front end.
    pub fn ansi(self) -> &'static str {
        match self {
            Self::Purple => "\x1b[35m",
            Self::Blue => "\x1b[34m",
            Self::Green => "\x1b[32m",
            Self::Orange => "\x1b[33m",
            Self::Teal => "\x1b[36m",
        }
    }
}

impl fmt::Display for ThemeColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemeColor {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SettingsError::InvalidValue {
                field: "themeColor".into(),
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub selected_voice_name: String,
    pub voice_speed: f32,
    pub voice_pitch: f32,
    pub voice_volume: f32,
    pub auto_speak: bool,
    pub theme_color: ThemeColor,
    pub dark_mode: bool,
    pub animations_enabled: bool,
    pub sound_effects: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selected_voice_name: "Samantha".into(),
            voice_speed: 0.85,
            voice_pitch: 1.1,
            voice_volume: 0.9,
            auto_speak: true,
            theme_color: ThemeColor::Purple,
            dark_mode: true,
            animations_enabled: true,
            sound_effects: true,
        }
    }
}

fn stored_field<T: DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    let value = obj.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring stored setting '{key}': {e}");
            None
        }
    }
}

fn stored_ranged(
    obj: &Map<String, Value>,
    key: &str,
    range: &RangeInclusive<f32>,
) -> Option<f32> {
    let value = stored_field::<f32>(obj, key)?;
    if range.contains(&value) {
        Some(value)
    } else {
        warn!("Ignoring stored setting '{key}': {value} outside {range:?}");
        None
    }
}

fn check_range(
    field: &'static str,
    value: f32,
    range: &RangeInclusive<f32>,
) -> Result<f32, SettingsError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(SettingsError::OutOfRange {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

impl Settings {
    /// Merge a stored payload over the defaults, field by field.
    pub fn from_stored(raw: &str) -> Self {
        let defaults = Self::default();

        let obj = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(obj)) => obj,
            Ok(other) => {
                warn!("Stored settings is not an object ({other}), using defaults");
                return defaults;
            }
            Err(e) => {
                warn!("Stored settings unreadable: {e}, using defaults");
                return defaults;
            }
        };

        Self {
            selected_voice_name: stored_field(&obj, "selectedVoiceName")
                .unwrap_or(defaults.selected_voice_name),
            voice_speed: stored_ranged(&obj, "voiceSpeed", &SPEED_RANGE)
                .unwrap_or(defaults.voice_speed),
            voice_pitch: stored_ranged(&obj, "voicePitch", &PITCH_RANGE)
                .unwrap_or(defaults.voice_pitch),
            voice_volume: stored_ranged(&obj, "voiceVolume", &VOLUME_RANGE)
                .unwrap_or(defaults.voice_volume),
            auto_speak: stored_field(&obj, "autoSpeak").unwrap_or(defaults.auto_speak),
            theme_color: stored_field(&obj, "themeColor").unwrap_or(defaults.theme_color),
            dark_mode: stored_field(&obj, "darkMode").unwrap_or(defaults.dark_mode),
            animations_enabled: stored_field(&obj, "animationsEnabled")
                .unwrap_or(defaults.animations_enabled),
            sound_effects: stored_field(&obj, "soundEffects").unwrap_or(defaults.sound_effects),
        }
    }

    /// Apply a single-field change. The record is untouched on error.
    pub fn apply(&mut self, change: SettingChange) -> Result<(), SettingsError> {
        match change {
            SettingChange::SelectedVoiceName(name) => self.selected_voice_name = name,
            SettingChange::VoiceSpeed(v) => {
                self.voice_speed = check_range("voiceSpeed", v, &SPEED_RANGE)?;
            }
            SettingChange::VoicePitch(v) => {
                self.voice_pitch = check_range("voicePitch", v, &PITCH_RANGE)?;
            }
            SettingChange::VoiceVolume(v) => {
                self.voice_volume = check_range("voiceVolume", v, &VOLUME_RANGE)?;
            }
            SettingChange::AutoSpeak(v) => self.auto_speak = v,
            SettingChange::ThemeColor(v) => self.theme_color = v,
            SettingChange::DarkMode(v) => self.dark_mode = v,
            SettingChange::AnimationsEnabled(v) => self.animations_enabled = v,
            SettingChange::SoundEffects(v) => self.sound_effects = v,
        }
        Ok(())
    }
}

/// A change to exactly one settings field.
///
/// On the wire this is `{"field": "voiceSpeed", "value": 1.2}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum SettingChange {
    SelectedVoiceName(String),
    VoiceSpeed(f32),
    VoicePitch(f32),
    VoiceVolume(f32),
    AutoSpeak(bool),
    ThemeColor(ThemeColor),
    DarkMode(bool),
    AnimationsEnabled(bool),
    SoundEffects(bool),
}

fn parse_value<T: FromStr>(field: &str, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(field: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(SettingsError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

impl SettingChange {
    /// Build a change from a field name and its textual value, as typed at
    /// the terminal (`/set voiceSpeed 1.2`).
    pub fn parse(field: &str, value: &str) -> Result<Self, SettingsError> {
        let change = match field.to_ascii_lowercase().as_str() {
            "selectedvoicename" | "voice" => Self::SelectedVoiceName(value.trim().to_string()),
            "voicespeed" | "speed" => Self::VoiceSpeed(parse_value(field, value)?),
            "voicepitch" | "pitch" => Self::VoicePitch(parse_value(field, value)?),
            "voicevolume" | "volume" => Self::VoiceVolume(parse_value(field, value)?),
            "autospeak" => Self::AutoSpeak(parse_flag(field, value)?),
            "themecolor" | "theme" => Self::ThemeColor(value.parse()?),
            "darkmode" => Self::DarkMode(parse_flag(field, value)?),
            "animationsenabled" | "animations" => {
                Self::AnimationsEnabled(parse_flag(field, value)?)
            }
            "soundeffects" => Self::SoundEffects(parse_flag(field, value)?),
            _ => return Err(SettingsError::UnknownField(field.to_string())),
        };
        Ok(change)
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            Self::SelectedVoiceName(_) => "selectedVoiceName",
            Self::VoiceSpeed(_) => "voiceSpeed",
            Self::VoicePitch(_) => "voicePitch",
            Self::VoiceVolume(_) => "voiceVolume",
            Self::AutoSpeak(_) => "autoSpeak",
            Self::ThemeColor(_) => "themeColor",
            Self::DarkMode(_) => "darkMode",
            Self::AnimationsEnabled(_) => "animationsEnabled",
            Self::SoundEffects(_) => "soundEffects",
        }
    }
}

/// Durable string storage keyed by name.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;
}

/// One `<key>.json` file per key inside a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        // Write-then-rename so readers never see a half-written record.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        debug!("Wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Observable settings backed by a [`KeyValueStore`].
pub struct SettingsStore {
    backend: Box<dyn KeyValueStore>,
    tx: watch::Sender<Settings>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Open the store and load the current record.
    pub fn open(backend: impl KeyValueStore + 'static) -> Self {
        let (tx, _rx) = watch::channel(Settings::default());
        let store = Self {
            backend: Box::new(backend),
            tx,
            write_lock: Mutex::new(()),
        };
        store.tx.send_replace(store.load());
        store
    }

    /// Read the durable record, merged over the defaults. Never fails.
    pub fn load(&self) -> Settings {
        match self.backend.get(SETTINGS_KEY) {
            Ok(Some(raw)) => Settings::from_stored(&raw),
            Ok(None) => {
                info!("No stored settings, using defaults");
                Settings::default()
            }
            Err(e) => {
                warn!("Failed to read stored settings: {e}, using defaults");
                Settings::default()
            }
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Change one field and persist the full record before returning.
    /// Returns the new settings.
    pub fn update(&self, change: SettingChange) -> Result<Settings, SettingsError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let field = change.field_name();
        let mut next = self.tx.borrow().clone();
        next.apply(change)?;

        let json = serde_json::to_string(&next)?;
        self.backend.set(SETTINGS_KEY, &json)?;
        info!("Setting '{field}' updated");

        self.tx.send_replace(next.clone());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct SharedStore(Arc<MemoryStore>);

    impl KeyValueStore for SharedStore {
        fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
            self.0.set(key, value)
        }
    }

    fn raw_store(payload: &str) -> MemoryStore {
        let store = MemoryStore::default();
        store.set(SETTINGS_KEY, payload).unwrap();
        store
    }

    #[test]
    fn empty_storage_yields_defaults() {
        let store = SettingsStore::open(MemoryStore::default());
        assert_eq!(store.snapshot(), Settings::default());
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn update_is_visible_after_reload_and_other_fields_untouched() {
        let shared = Arc::new(MemoryStore::default());
        let store = SettingsStore::open(SharedStore(shared.clone()));

        let changes = [
            SettingChange::SelectedVoiceName("Karen".into()),
            SettingChange::VoiceSpeed(1.5),
            SettingChange::VoicePitch(0.5),
            SettingChange::VoiceVolume(0.0),
            SettingChange::AutoSpeak(false),
            SettingChange::ThemeColor(ThemeColor::Teal),
            SettingChange::DarkMode(false),
            SettingChange::AnimationsEnabled(false),
            SettingChange::SoundEffects(false),
        ];

        for change in changes {
            let before = store.snapshot();
            let mut expected = before.clone();
            expected.apply(change.clone()).unwrap();

            let returned = store.update(change).unwrap();
            assert_eq!(returned, expected);
            assert_eq!(store.snapshot(), expected);

            let reloaded = SettingsStore::open(SharedStore(shared.clone())).snapshot();
            assert_eq!(reloaded, expected);
            assert_eq!(store.load(), expected);
        }
    }

    #[test]
    fn file_store_survives_a_fresh_process() {
        let dir = tempfile::tempdir().unwrap();

        let store = SettingsStore::open(FileStore::new(dir.path()));
        store.update(SettingChange::VoiceSpeed(1.25)).unwrap();
        store
            .update(SettingChange::ThemeColor(ThemeColor::Orange))
            .unwrap();

        let reopened = SettingsStore::open(FileStore::new(dir.path())).snapshot();
        assert_eq!(reopened.voice_speed, 1.25);
        assert_eq!(reopened.theme_color, ThemeColor::Orange);
        assert_eq!(reopened.selected_voice_name, "Samantha");

        let raw = fs::read_to_string(dir.path().join(format!("{SETTINGS_KEY}.json"))).unwrap();
        let json: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["themeColor"], "orange");
        assert!(json.get("voiceSpeed").is_some());
    }

    #[test]
    fn out_of_range_update_is_rejected_without_writing() {
        let shared = Arc::new(MemoryStore::default());
        let store = SettingsStore::open(SharedStore(shared.clone()));

        let err = store.update(SettingChange::VoiceSpeed(2.5)).unwrap_err();
        assert!(matches!(err, SettingsError::OutOfRange { field: "voiceSpeed", .. }));
        assert!(store.update(SettingChange::VoiceVolume(-0.1)).is_err());
        assert!(store.update(SettingChange::VoicePitch(f32::NAN)).is_err());

        assert_eq!(store.snapshot(), Settings::default());
        assert!(shared.get(SETTINGS_KEY).unwrap().is_none());
    }

    #[test]
    fn partial_payload_merges_over_defaults() {
        let store = SettingsStore::open(raw_store(r#"{"voiceSpeed": 1.4, "darkMode": false}"#));
        let settings = store.snapshot();
        assert_eq!(settings.voice_speed, 1.4);
        assert!(!settings.dark_mode);
        assert_eq!(settings.voice_pitch, 1.1);
        assert_eq!(settings.theme_color, ThemeColor::Purple);
    }

    #[test]
    fn malformed_payloads_never_fail() {
        let payloads = [
            "not json at all",
            "[1, 2, 3]",
            "42",
            "null",
            "",
            r#"{"voiceSpeed": "fast"}"#,
        ];
        for payload in payloads {
            let settings = Settings::from_stored(payload);
            assert_eq!(settings, Settings::default(), "payload: {payload:?}");
        }
    }

    #[test]
    fn wrongly_typed_fields_fall_back_individually() {
        let settings = Settings::from_stored(
            r#"{
                "selectedVoiceName": 7,
                "voiceSpeed": 9.0,
                "voicePitch": 1,
                "voiceVolume": "loud",
                "autoSpeak": "yes",
                "themeColor": "magenta",
                "darkMode": false,
                "animationsEnabled": null,
                "soundEffects": false,
                "somethingElse": true
            }"#,
        );
        let defaults = Settings::default();

        assert_eq!(settings.selected_voice_name, defaults.selected_voice_name);
        assert_eq!(settings.voice_speed, defaults.voice_speed);
        assert_eq!(settings.voice_pitch, 1.0);
        assert_eq!(settings.voice_volume, defaults.voice_volume);
        assert_eq!(settings.auto_speak, defaults.auto_speak);
        assert_eq!(settings.theme_color, defaults.theme_color);
        assert!(!settings.dark_mode);
        assert_eq!(settings.animations_enabled, defaults.animations_enabled);
        assert!(!settings.sound_effects);
    }

    #[test]
    fn subscribers_see_each_update() {
        let store = SettingsStore::open(MemoryStore::default());
        let mut rx = store.subscribe();

        store.update(SettingChange::AutoSpeak(false)).unwrap();

        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().auto_speak);
    }

    #[test]
    fn change_parses_from_terminal_text() {
        assert_eq!(
            SettingChange::parse("voiceSpeed", "1.2").unwrap(),
            SettingChange::VoiceSpeed(1.2)
        );
        assert_eq!(
            SettingChange::parse("theme", "Blue").unwrap(),
            SettingChange::ThemeColor(ThemeColor::Blue)
        );
        assert_eq!(
            SettingChange::parse("autoSpeak", "off").unwrap(),
            SettingChange::AutoSpeak(false)
        );
        assert!(matches!(
            SettingChange::parse("fontSize", "12"),
            Err(SettingsError::UnknownField(_))
        ));
        assert!(matches!(
            SettingChange::parse("darkMode", "maybe"),
            Err(SettingsError::InvalidValue { .. })
        ));
    }

    #[test]
    fn change_uses_tagged_wire_format() {
        let change: SettingChange =
            serde_json::from_str(r#"{"field": "voiceVolume", "value": 0.5}"#).unwrap();
        assert_eq!(change, SettingChange::VoiceVolume(0.5));

        let change: SettingChange =
            serde_json::from_str(r#"{"field": "themeColor", "value": "green"}"#).unwrap();
        assert_eq!(change, SettingChange::ThemeColor(ThemeColor::Green));
    }
}

//! Speech synthesis boundary and narration types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const MIN_RATE: f32 = 0.5;
pub const MAX_RATE: f32 = 2.0;
pub const MIN_PITCH: f32 = 0.5;
pub const MAX_PITCH: f32 = 2.0;

/// A voice offered by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub lang: String,
    #[serde(default)]
    pub default: bool,
}

/// Text to speak and how to speak it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

/// How an utterance ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEnd {
    Finished,
    /// Cancelled before the end
    Interrupted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrationState {
    #[default]
    Idle,
    Speaking,
    Paused,
}

/// Persisted voice settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceOptions {
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

impl VoiceOptions {
    pub fn clamp_rate(rate: f32) -> f32 {
        clamp_or(rate, MIN_RATE, MAX_RATE, 1.0)
    }

    pub fn clamp_pitch(pitch: f32) -> f32 {
        clamp_or(pitch, MIN_PITCH, MAX_PITCH, 1.0)
    }

    pub fn clamp_volume(volume: f32) -> f32 {
        clamp_or(volume, 0.0, 1.0, 1.0)
    }

    pub fn utterance(&self, text: String) -> Utterance {
        Utterance {
            text,
            voice: self.voice.clone(),
            rate: self.rate,
            pitch: self.pitch,
            volume: self.volume,
        }
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

/// Platform text-to-speech engine
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn voices(&self) -> Vec<Voice>;

    /// Speak an utterance, resolving when it ends or is cancelled
    async fn speak(&self, utterance: Utterance) -> Result<SpeechEnd>;

    fn pause(&self);

    fn resume(&self);

    /// Stop the current utterance; its `speak` resolves `Interrupted`
    fn cancel(&self);
}

//! Continuous narration
//!
//! Reads the visible page aloud, then turns the page through the navigation
//! sequencer and keeps going until the book ends or the reader stops it.
//! Every utterance belongs to a session number; stopping or restarting bumps
//! the number, so the completion of an abandoned utterance is ignored.

mod types;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::{self, ErrorCallback, ReaderError, Result};
use crate::navigation::Navigator;
use crate::renderer::RendererHandle;
use crate::settings::{self, SettingsStore};

pub use types::{
    NarrationState, SpeechEnd, SpeechSynthesizer, Utterance, Voice, VoiceOptions, MAX_PITCH,
    MAX_RATE, MIN_PITCH, MIN_RATE,
};

const VOICE_KEY: &str = "tts.voice";
const RATE_KEY: &str = "tts.rate";
const PITCH_KEY: &str = "tts.pitch";
const VOLUME_KEY: &str = "tts.volume";

#[derive(Clone)]
pub struct NarrationController {
    inner: Arc<Inner>,
}

struct Inner {
    renderer: RendererHandle,
    navigator: Navigator,
    synth: Arc<dyn SpeechSynthesizer>,
    settings: Arc<dyn SettingsStore>,
    on_error: ErrorCallback,
    settle: Duration,
    state: RwLock<NarrationState>,
    options: RwLock<VoiceOptions>,
    session: AtomicU64,
    /// Set when a page turn finished while paused; the next resume speaks it
    resume_pending: AtomicBool,
}

impl NarrationController {
    pub fn new(
        renderer: RendererHandle,
        navigator: Navigator,
        synth: Arc<dyn SpeechSynthesizer>,
        settings: Arc<dyn SettingsStore>,
        settle: Duration,
        on_error: ErrorCallback,
    ) -> Self {
        let options = load_options(settings.as_ref());
        Self {
            inner: Arc::new(Inner {
                renderer,
                navigator,
                synth,
                settings,
                on_error,
                settle,
                state: RwLock::new(NarrationState::Idle),
                options: RwLock::new(options),
                session: AtomicU64::new(0),
                resume_pending: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> NarrationState {
        *self.inner.state.read()
    }

    pub fn options(&self) -> VoiceOptions {
        self.inner.options.read().clone()
    }

    pub fn voices(&self) -> Vec<Voice> {
        self.inner.synth.voices()
    }

    /// Read the visible page aloud, continuing page after page
    pub fn start_speaking(&self) {
        Inner::start_speaking(&self.inner);
    }

    pub fn stop_speaking(&self) {
        self.inner.stop();
    }

    pub fn pause_speaking(&self) {
        let mut state = self.inner.state.write();
        if *state == NarrationState::Speaking {
            self.inner.synth.pause();
            *state = NarrationState::Paused;
        }
    }

    /// Continue after a pause. A pause that outlasted a page turn starts
    /// the new page here, since no utterance is left to resume.
    pub fn resume_speaking(&self) {
        Inner::resume(&self.inner);
    }

    pub fn set_voice(&self, voice: Option<String>) -> Result<()> {
        self.inner.options.write().voice = voice.clone();
        settings::save(self.inner.settings.as_ref(), VOICE_KEY, &voice)
    }

    /// Set the speaking rate, clamped to 0.5-2.0. Returns the applied value.
    pub fn set_rate(&self, rate: f32) -> Result<f32> {
        let rate = VoiceOptions::clamp_rate(rate);
        self.inner.options.write().rate = rate;
        settings::save(self.inner.settings.as_ref(), RATE_KEY, &rate)?;
        Ok(rate)
    }

    pub fn set_pitch(&self, pitch: f32) -> Result<f32> {
        let pitch = VoiceOptions::clamp_pitch(pitch);
        self.inner.options.write().pitch = pitch;
        settings::save(self.inner.settings.as_ref(), PITCH_KEY, &pitch)?;
        Ok(pitch)
    }

    pub fn set_volume(&self, volume: f32) -> Result<f32> {
        let volume = VoiceOptions::clamp_volume(volume);
        self.inner.options.write().volume = volume;
        settings::save(self.inner.settings.as_ref(), VOLUME_KEY, &volume)?;
        Ok(volume)
    }
}

impl Inner {
    fn start_speaking(inner: &Arc<Inner>) {
        // A new start supersedes whatever is playing
        let session = inner.session.fetch_add(1, Ordering::SeqCst) + 1;
        inner.resume_pending.store(false, Ordering::SeqCst);
        if *inner.state.read() != NarrationState::Idle {
            inner.synth.cancel();
        }
        Inner::speak_page(inner, session);
    }

    fn resume(inner: &Arc<Inner>) {
        let restart = {
            let mut state = inner.state.write();
            if *state != NarrationState::Paused {
                return;
            }
            *state = NarrationState::Speaking;
            inner.resume_pending.swap(false, Ordering::SeqCst)
        };

        if restart {
            let session = inner.session.load(Ordering::SeqCst);
            tracing::debug!(session, "Resuming on the turned page");
            Inner::speak_page(inner, session);
        } else {
            inner.synth.resume();
        }
    }

    /// Speak the visible page as part of `session`
    fn speak_page(inner: &Arc<Inner>, session: u64) {
        let text = inner
            .renderer
            .get()
            .and_then(|renderer| renderer.current_text())
            .filter(|text| !text.trim().is_empty());

        let Some(text) = text else {
            *inner.state.write() = NarrationState::Idle;
            error::report(&inner.on_error, "Nothing to narrate", &ReaderError::NoText);
            return;
        };

        let utterance = inner.options.read().utterance(text);
        *inner.state.write() = NarrationState::Speaking;
        tracing::debug!(session, chars = utterance.text.len(), "Speaking page");

        let task = inner.clone();
        tokio::spawn(async move {
            let outcome = task.synth.speak(utterance).await;
            task.on_utterance_end(session, outcome).await;
        });
    }

    async fn on_utterance_end(self: Arc<Self>, session: u64, outcome: Result<SpeechEnd>) {
        if !self.is_current(session) {
            return;
        }

        match outcome {
            Ok(SpeechEnd::Finished) => {}
            Ok(SpeechEnd::Interrupted) => {
                *self.state.write() = NarrationState::Idle;
                return;
            }
            Err(err) => {
                *self.state.write() = NarrationState::Idle;
                error::report(&self.on_error, "Speech synthesis failed", &err);
                return;
            }
        }

        let at_end = self.renderer.get().map_or(true, |renderer| renderer.at_end());
        if at_end {
            tracing::debug!(session, "Narration reached the end of the book");
            *self.state.write() = NarrationState::Idle;
            return;
        }

        let inner = self.clone();
        self.navigator
            .sequencer()
            .safe_navigate(move || async move {
                if !inner.is_current(session) {
                    return Ok(());
                }
                let Some(renderer) = inner.renderer.get() else {
                    return Ok(());
                };
                if let Err(err) = renderer.next().await {
                    *inner.state.write() = NarrationState::Idle;
                    return Err(err);
                }
                tokio::time::sleep(inner.settle).await;
                if !inner.is_current(session) {
                    return Ok(());
                }
                let speak = match *inner.state.read() {
                    NarrationState::Speaking => true,
                    NarrationState::Paused => {
                        inner.resume_pending.store(true, Ordering::SeqCst);
                        false
                    }
                    NarrationState::Idle => false,
                };
                if speak {
                    Inner::speak_page(&inner, session);
                }
                Ok(())
            })
            .await;
    }

    fn stop(&self) {
        self.session.fetch_add(1, Ordering::SeqCst);
        self.resume_pending.store(false, Ordering::SeqCst);
        let previous = std::mem::replace(&mut *self.state.write(), NarrationState::Idle);
        if previous != NarrationState::Idle {
            self.synth.cancel();
            tracing::debug!("Narration stopped");
        }
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.load(Ordering::SeqCst) == session
    }
}

fn load_options(store: &dyn SettingsStore) -> VoiceOptions {
    let defaults = VoiceOptions::default();
    VoiceOptions {
        voice: settings::load::<Option<String>>(store, VOICE_KEY).flatten(),
        rate: settings::load(store, RATE_KEY)
            .map(VoiceOptions::clamp_rate)
            .unwrap_or(defaults.rate),
        pitch: settings::load(store, PITCH_KEY)
            .map(VoiceOptions::clamp_pitch)
            .unwrap_or(defaults.pitch),
        volume: settings::load(store, VOLUME_KEY)
            .map(VoiceOptions::clamp_volume)
            .unwrap_or(defaults.volume),
    }
}

impl std::fmt::Debug for NarrationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrationController")
            .field("state", &self.state())
            .field("options", &self.options())
            .finish()
    }
}

//! Speech synthesis session
//!
//! Wraps the host synthesizer behind `SpeechSynthesizer` and keeps the
//! store's speaking flag in step with utterance lifecycle events. Only one
//! utterance is active at a time; a new `speak` cancels the previous one, and
//! events that arrive for a superseded utterance are ignored.

use crate::store::{Behavior, BehaviorStore};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Message surfaced through the store when synthesis fails
pub const SYNTHESIS_FAILED_MESSAGE: &str = "speech synthesis failed";

/// Configuration for spoken output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// BCP-47 language tag
    pub lang: String,

    pub rate: f32,
    pub pitch: f32,

    /// Output volume, 0.0 to 1.0
    pub volume: f32,

    /// Preferred voice; used when a voice with exactly this name exists
    pub voice_name: Option<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            lang: "zh-CN".to_string(),
            rate: 1.0,
            pitch: 1.0,
            volume: 0.8,
            voice_name: None,
        }
    }
}

impl SynthesisConfig {
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    /// Set the volume, clamped to 0.0..=1.0
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn with_voice(mut self, name: impl Into<String>) -> Self {
        self.voice_name = Some(name.into());
        self
    }

    /// Two-letter language prefix used for voice matching ("zh" for "zh-CN")
    pub fn language_prefix(&self) -> String {
        self.lang.chars().take(2).collect::<String>().to_lowercase()
    }
}

/// A voice offered by the host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub lang: String,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// One request to the host synthesizer
#[derive(Clone, Debug)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub lang: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub voice: Option<Voice>,
}

/// Lifecycle events reported by the host for one utterance
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UtteranceEvent {
    Start,
    End,
    Error(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("speech synthesis failed: {0}")]
    Engine(String),

    /// The utterance was cancelled or superseded before it finished
    #[error("utterance interrupted")]
    Interrupted,
}

impl From<SynthesisError> for crate::AvatarError {
    fn from(e: SynthesisError) -> Self {
        crate::AvatarError::SynthesisError(e.to_string())
    }
}

/// Host speech synthesizer
pub trait SpeechSynthesizer: Send + Sync {
    /// Voices currently available; may be empty until the host has loaded them
    fn voices(&self) -> Vec<Voice>;

    /// Queue an utterance. Lifecycle events for it go to `events`.
    fn speak(
        &self,
        utterance: Utterance,
        events: UnboundedSender<UtteranceEvent>,
    ) -> Result<(), SynthesisError>;

    /// Cancel whatever is being spoken. Harmless when idle.
    fn cancel(&self);
}

/// Pick a voice: exact configured name, then language prefix, then the first
/// voice offered
pub fn select_voice(voices: &[Voice], config: &SynthesisConfig) -> Option<Voice> {
    if let Some(name) = config.voice_name.as_deref() {
        if let Some(voice) = voices.iter().find(|v| v.name == name) {
            return Some(voice.clone());
        }
    }
    let prefix = config.language_prefix();
    voices
        .iter()
        .find(|v| v.lang.to_lowercase().starts_with(&prefix))
        .or_else(|| voices.first())
        .cloned()
}

pub struct SpeechSynthesisSession {
    synth: Arc<dyn SpeechSynthesizer>,
    store: BehaviorStore,
    config: SynthesisConfig,
    voices: RwLock<Vec<Voice>>,
    /// Id of the utterance allowed to touch the store
    current: AtomicU64,
}

impl SpeechSynthesisSession {
    pub fn new(
        synth: Arc<dyn SpeechSynthesizer>,
        store: BehaviorStore,
        config: SynthesisConfig,
    ) -> Self {
        let voices = synth.voices();
        if voices.is_empty() {
            debug!("No voices yet, selection deferred until the voice list changes");
        } else {
            info!("{} synthesis voices available", voices.len());
        }
        Self {
            synth,
            store,
            config,
            voices: RwLock::new(voices),
            current: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Call when the host reports a changed voice list
    pub fn on_voices_changed(&self) {
        let voices = self.synth.voices();
        debug!("Voice list changed ({} voices)", voices.len());
        *self.voices.write() = voices;
    }

    pub fn voices(&self) -> Vec<Voice> {
        self.voices.read().clone()
    }

    /// Speak with the session's configuration
    pub async fn speak(&self, text: &str) -> Result<(), SynthesisError> {
        self.speak_with(text, &self.config).await
    }

    /// Speak `text`, resolving when the utterance ends.
    ///
    /// Any utterance already in progress is cancelled first. If this one is
    /// superseded in turn, it resolves with `Interrupted` and leaves the
    /// speaking flag to the newer utterance.
    pub async fn speak_with(
        &self,
        text: &str,
        config: &SynthesisConfig,
    ) -> Result<(), SynthesisError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        // Retire the old id before cancelling so its end event reads as stale
        let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.synth.cancel();

        let voice = select_voice(&self.voices.read(), config);
        let utterance = Utterance {
            id,
            text: text.to_string(),
            lang: config.lang.clone(),
            rate: config.rate,
            pitch: config.pitch,
            volume: config.volume,
            voice,
        };
        debug!(
            utterance = id,
            voice = ?utterance.voice.as_ref().map(|v| v.name.as_str()),
            "Speaking {} chars",
            utterance.text.chars().count()
        );

        let (tx, mut rx) = unbounded_channel();
        if let Err(e) = self.synth.speak(utterance, tx) {
            error!("Synthesizer rejected utterance: {}", e);
            if self.is_current(id) {
                self.finish();
                self.store.set_error(Some(SYNTHESIS_FAILED_MESSAGE.to_string()));
            }
            return Err(e);
        }

        while let Some(event) = rx.recv().await {
            if !self.is_current(id) {
                debug!(utterance = id, "Ignoring {:?} from superseded utterance", event);
                return Err(SynthesisError::Interrupted);
            }
            match event {
                UtteranceEvent::Start => {
                    self.store.set_speaking(true);
                    self.store.set_behavior(Behavior::Speaking);
                }
                UtteranceEvent::End => {
                    self.finish();
                    return Ok(());
                }
                UtteranceEvent::Error(reason) => {
                    warn!(utterance = id, "Synthesis error: {}", reason);
                    self.finish();
                    self.store.set_error(Some(SYNTHESIS_FAILED_MESSAGE.to_string()));
                    return Err(SynthesisError::Engine(reason));
                }
            }
        }

        // Host dropped the utterance without reporting an end
        if self.is_current(id) {
            self.finish();
        }
        Err(SynthesisError::Interrupted)
    }

    /// Cancel any utterance and clear the speaking flag unconditionally
    pub fn stop(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
        self.synth.cancel();
        self.store.set_speaking(false);
    }

    fn is_current(&self, id: u64) -> bool {
        self.current.load(Ordering::SeqCst) == id
    }

    fn finish(&self) {
        self.store.set_speaking(false);
        self.store.set_behavior(Behavior::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Synthesizer whose events are driven by the test
    #[derive(Default)]
    struct ManualSynth {
        voices: Mutex<Vec<Voice>>,
        utterances: Mutex<Vec<Utterance>>,
        channels: Mutex<Vec<UnboundedSender<UtteranceEvent>>>,
        cancels: AtomicUsize,
        reject: bool,
        /// Report the end of the running utterance from inside `cancel`, as hosts do
        end_on_cancel: bool,
    }

    impl ManualSynth {
        fn emit(&self, index: usize, event: UtteranceEvent) {
            let _ = self.channels.lock()[index].send(event);
        }
    }

    impl SpeechSynthesizer for ManualSynth {
        fn voices(&self) -> Vec<Voice> {
            self.voices.lock().clone()
        }

        fn speak(
            &self,
            utterance: Utterance,
            events: UnboundedSender<UtteranceEvent>,
        ) -> Result<(), SynthesisError> {
            if self.reject {
                return Err(SynthesisError::Engine("no audio output".into()));
            }
            self.utterances.lock().push(utterance);
            self.channels.lock().push(events);
            Ok(())
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            if self.end_on_cancel {
                if let Some(tx) = self.channels.lock().last() {
                    let _ = tx.send(UtteranceEvent::End);
                }
                // Give the other worker time to handle the end
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
        }
    }

    fn session(synth: Arc<ManualSynth>) -> (Arc<SpeechSynthesisSession>, BehaviorStore) {
        let store = BehaviorStore::in_memory();
        let session =
            SpeechSynthesisSession::new(synth, store.clone(), SynthesisConfig::default());
        (Arc::new(session), store)
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_select_voice_prefers_exact_name() {
        let voices = vec![
            Voice::new("Alex", "en-US"),
            Voice::new("Tingting", "zh-CN"),
            Voice::new("Meijia", "zh-TW"),
        ];
        let config = SynthesisConfig::default().with_voice("Meijia");
        assert_eq!(select_voice(&voices, &config).unwrap().name, "Meijia");
    }

    #[test]
    fn test_select_voice_by_language_then_first() {
        let voices = vec![Voice::new("Alex", "en-US"), Voice::new("Tingting", "zh-CN")];
        let config = SynthesisConfig::default().with_voice("Missing");
        assert_eq!(select_voice(&voices, &config).unwrap().name, "Tingting");

        let french = SynthesisConfig::default().with_lang("fr-FR");
        assert_eq!(select_voice(&voices, &french).unwrap().name, "Alex");
        assert!(select_voice(&[], &french).is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config = SynthesisConfig::default();
        assert_eq!(config.lang, "zh-CN");
        assert_eq!(config.volume, 0.8);
        assert_eq!(config.language_prefix(), "zh");
        assert_eq!(config.with_volume(3.0).volume, 1.0);
    }

    #[tokio::test]
    async fn test_speak_lifecycle_updates_store() {
        let synth = Arc::new(ManualSynth::default());
        let (session, store) = session(synth.clone());

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.speak("你好").await }
        });
        settle().await;

        synth.emit(0, UtteranceEvent::Start);
        settle().await;
        assert!(store.is_speaking());
        assert_eq!(store.current_behavior(), Behavior::Speaking);

        synth.emit(0, UtteranceEvent::End);
        assert_eq!(task.await.unwrap(), Ok(()));
        assert!(!store.is_speaking());
        assert_eq!(store.current_behavior(), Behavior::Idle);
    }

    #[tokio::test]
    async fn test_speak_error_sets_message() {
        let synth = Arc::new(ManualSynth::default());
        let (session, store) = session(synth.clone());

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.speak("hello").await }
        });
        settle().await;
        synth.emit(0, UtteranceEvent::Start);
        synth.emit(0, UtteranceEvent::Error("synthesis-failed".into()));

        assert_eq!(
            task.await.unwrap(),
            Err(SynthesisError::Engine("synthesis-failed".into()))
        );
        assert!(!store.is_speaking());
        assert_eq!(store.error().as_deref(), Some(SYNTHESIS_FAILED_MESSAGE));
    }

    #[tokio::test]
    async fn test_rejected_utterance() {
        let synth = Arc::new(ManualSynth {
            reject: true,
            ..Default::default()
        });
        let (session, store) = session(synth);
        assert!(session.speak("hello").await.is_err());
        assert!(!store.is_speaking());
        assert!(store.error().is_some());
    }

    #[tokio::test]
    async fn test_superseded_utterance_does_not_clear_speaking() {
        let synth = Arc::new(ManualSynth::default());
        let (session, store) = session(synth.clone());

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.speak("first").await }
        });
        settle().await;
        synth.emit(0, UtteranceEvent::Start);
        settle().await;

        let second = tokio::spawn({
            let session = session.clone();
            async move { session.speak("second").await }
        });
        settle().await;
        synth.emit(1, UtteranceEvent::Start);
        settle().await;

        // The cancelled first utterance reports its end late
        synth.emit(0, UtteranceEvent::End);
        assert_eq!(first.await.unwrap(), Err(SynthesisError::Interrupted));
        assert!(store.is_speaking());

        synth.emit(1, UtteranceEvent::End);
        assert_eq!(second.await.unwrap(), Ok(()));
        assert!(!store.is_speaking());
        assert_eq!(synth.cancels.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_end_reported_during_cancel_is_stale() {
        let synth = Arc::new(ManualSynth {
            end_on_cancel: true,
            ..Default::default()
        });
        let (session, store) = session(synth.clone());

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.speak("first").await }
        });
        while synth.channels.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        synth.emit(0, UtteranceEvent::Start);

        let second = tokio::spawn({
            let session = session.clone();
            async move { session.speak("second").await }
        });
        assert_eq!(first.await.unwrap(), Err(SynthesisError::Interrupted));

        while synth.channels.lock().len() < 2 {
            tokio::task::yield_now().await;
        }
        synth.emit(1, UtteranceEvent::Start);
        synth.emit(1, UtteranceEvent::End);
        assert_eq!(second.await.unwrap(), Ok(()));
        assert!(!store.is_speaking());
    }

    #[tokio::test]
    async fn test_deferred_voice_selection() {
        let synth = Arc::new(ManualSynth::default());
        let (session, _store) = session(synth.clone());
        assert!(session.voices().is_empty());

        *synth.voices.lock() = vec![Voice::new("Tingting", "zh-CN")];
        session.on_voices_changed();

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.speak("你好").await }
        });
        settle().await;
        let voice = synth.utterances.lock()[0].voice.clone();
        assert_eq!(voice.map(|v| v.name), Some("Tingting".to_string()));
        synth.emit(0, UtteranceEvent::End);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_forces_speaking_off() {
        let synth = Arc::new(ManualSynth::default());
        let (session, store) = session(synth.clone());

        // Idle stop is a no-op apart from the reset
        session.stop();
        session.stop();
        assert!(!store.is_speaking());

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.speak("long reply").await }
        });
        settle().await;
        synth.emit(0, UtteranceEvent::Start);
        settle().await;
        assert!(store.is_speaking());

        session.stop();
        assert!(!store.is_speaking());
        synth.emit(0, UtteranceEvent::End);
        assert_eq!(task.await.unwrap(), Err(SynthesisError::Interrupted));
    }

    #[tokio::test]
    async fn test_empty_text_is_skipped() {
        let synth = Arc::new(ManualSynth::default());
        let (session, _store) = session(synth.clone());
        assert_eq!(session.speak("   ").await, Ok(()));
        assert!(synth.utterances.lock().is_empty());
    }
}

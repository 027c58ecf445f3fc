//! Speech recognition session
//!
//! One utterance per `start`: the host recognizer listens, reports interim and
//! final transcripts, then ends. Final transcripts in command mode go through
//! the local command table first and to the dialogue backend otherwise.

use super::commands::VoiceCommand;
use crate::store::BehaviorStore;
use crate::{AvatarError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const UNSUPPORTED_MESSAGE: &str = "speech recognition is not supported on this host";
pub const START_FAILED_MESSAGE: &str = "failed to start speech recognition";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub lang: String,

    /// Listening is stopped automatically after this long
    pub max_listen_duration_ms: u64,

    /// Forward unmatched final transcripts to the dialogue backend
    pub dispatch_to_backend: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            lang: "zh-CN".to_string(),
            max_listen_duration_ms: 30_000,
            dispatch_to_backend: true,
        }
    }
}

impl RecognitionConfig {
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_max_listen_duration(mut self, duration: Duration) -> Self {
        self.max_listen_duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn without_backend_dispatch(mut self) -> Self {
        self.dispatch_to_backend = false;
        self
    }

    pub fn max_listen_duration(&self) -> Duration {
        Duration::from_millis(self.max_listen_duration_ms)
    }
}

/// Engine error codes and their user-facing messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorCode {
    #[error("no speech was detected, please try again")]
    NoSpeech,

    #[error("no microphone was found or it is not working")]
    AudioCapture,

    #[error("microphone permission denied")]
    NotAllowed,

    #[error("network error during speech recognition")]
    Network,

    #[error("speech recognition was aborted")]
    Aborted,

    #[error("the recognition language is not supported")]
    LanguageNotSupported,

    #[error("recognition failed: {0}")]
    Other(String),
}

impl RecognitionErrorCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => Self::NoSpeech,
            "audio-capture" => Self::AudioCapture,
            "not-allowed" | "service-not-allowed" => Self::NotAllowed,
            "network" => Self::Network,
            "aborted" => Self::Aborted,
            "language-not-supported" => Self::LanguageNotSupported,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Events reported by the host recognizer
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Start,
    Result {
        transcript: String,
        confidence: f32,
        is_final: bool,
    },
    Error(RecognitionErrorCode),
    End,
}

/// Host recognizer. Calls may fail when nothing is active; the session
/// swallows those failures.
pub trait SpeechRecognizer: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Begin one utterance; events for it go to `events`
    fn start(
        &self,
        config: &RecognitionConfig,
        events: UnboundedSender<RecognitionEvent>,
    ) -> std::result::Result<(), String>;

    /// Stop listening and deliver any pending final result
    fn stop(&self) -> std::result::Result<(), String>;

    /// Stop listening and discard pending results
    fn abort(&self) -> std::result::Result<(), String>;
}

/// Receives what the user said
#[async_trait]
pub trait TranscriptHandler: Send + Sync {
    async fn run_command(&self, command: VoiceCommand);

    /// Send unmatched speech to the dialogue backend
    async fn dispatch(&self, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenMode {
    #[default]
    Command,
    Dictation,
}

pub type ResultCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ListenOptions {
    pub on_result: Option<ResultCallback>,
    pub mode: ListenMode,
}

impl ListenOptions {
    pub fn command() -> Self {
        Self::default()
    }

    pub fn dictation() -> Self {
        Self {
            on_result: None,
            mode: ListenMode::Dictation,
        }
    }

    pub fn with_callback(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_result = Some(Arc::new(callback));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionState {
    Unsupported,
    Idle,
    Listening,
}

struct Listening {
    state: RecognitionState,
    options: ListenOptions,
    pump: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

struct Shared {
    recognizer: Arc<dyn SpeechRecognizer>,
    store: BehaviorStore,
    config: RecognitionConfig,
    handler: Mutex<Option<Arc<dyn TranscriptHandler>>>,
    listening: Mutex<Listening>,
    /// Bumped by every start and abort; events from older utterances are dropped
    utterance: AtomicU64,
}

/// Cheap to clone; clones share one recognizer
#[derive(Clone)]
pub struct SpeechRecognitionSession {
    shared: Arc<Shared>,
}

impl SpeechRecognitionSession {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        store: BehaviorStore,
        config: RecognitionConfig,
    ) -> Self {
        let state = if recognizer.is_supported() {
            RecognitionState::Idle
        } else {
            warn!("Speech recognition not supported");
            RecognitionState::Unsupported
        };
        Self {
            shared: Arc::new(Shared {
                recognizer,
                store,
                config,
                handler: Mutex::new(None),
                listening: Mutex::new(Listening {
                    state,
                    options: ListenOptions::default(),
                    pump: None,
                    watchdog: None,
                }),
                utterance: AtomicU64::new(0),
            }),
        }
    }

    /// Route commands and unmatched transcripts to `handler`
    pub fn set_handler(&self, handler: Arc<dyn TranscriptHandler>) {
        *self.shared.handler.lock() = Some(handler);
    }

    pub fn state(&self) -> RecognitionState {
        self.shared.listening.lock().state
    }

    pub fn is_supported(&self) -> bool {
        self.state() != RecognitionState::Unsupported
    }

    pub fn is_listening(&self) -> bool {
        self.state() == RecognitionState::Listening
    }

    /// Start listening for one utterance.
    ///
    /// Fails with `Unsupported` when the host has no recognizer. Calling this
    /// while already listening does nothing.
    pub fn start(&self, options: ListenOptions) -> Result<()> {
        let shared = &self.shared;
        let mut listening = shared.listening.lock();
        match listening.state {
            RecognitionState::Unsupported => {
                drop(listening);
                shared.store.set_error(Some(UNSUPPORTED_MESSAGE.to_string()));
                return Err(AvatarError::Unsupported(UNSUPPORTED_MESSAGE.to_string()));
            }
            RecognitionState::Listening => {
                debug!("Already listening");
                return Ok(());
            }
            RecognitionState::Idle => {}
        }

        let Ok(runtime) = Handle::try_current() else {
            return Err(AvatarError::RecognitionError(
                "recognition needs an async runtime".to_string(),
            ));
        };
        let id = shared.utterance.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = unbounded_channel();
        if let Err(e) = shared.recognizer.start(&shared.config, tx) {
            drop(listening);
            warn!("Recognizer failed to start: {}", e);
            shared.store.set_recording(false);
            shared.store.set_error(Some(START_FAILED_MESSAGE.to_string()));
            return Err(AvatarError::RecognitionError(e));
        }

        listening.state = RecognitionState::Listening;
        listening.options = options;
        abort_tasks(&mut listening);
        listening.pump = Some(runtime.spawn(pump_events(self.clone(), rx, id)));
        listening.watchdog = Some(runtime.spawn(watchdog(
            self.clone(),
            id,
            shared.config.max_listen_duration(),
        )));
        drop(listening);

        shared.store.set_recording(true);
        info!(utterance = id, "Listening ({})", shared.config.lang);
        Ok(())
    }

    /// Stop listening. A pending final result may still arrive.
    pub fn stop(&self) {
        if let Err(e) = self.shared.recognizer.stop() {
            debug!("Recognizer stop ignored: {}", e);
        }
        self.finish(None);
    }

    /// Stop listening and drop anything not yet delivered
    pub fn abort(&self) {
        self.shared.utterance.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.shared.recognizer.abort() {
            debug!("Recognizer abort ignored: {}", e);
        }
        let tasks = self.finish(None);
        if let Some(pump) = tasks {
            pump.abort();
        }
    }

    /// Process one host event for the current utterance.
    ///
    /// Never waits on the transcript handler, so `End` and `Error` reset the
    /// recording flag as soon as the host reports them.
    pub fn handle_event(&self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Start => debug!("Recognition started"),
            RecognitionEvent::Result {
                transcript,
                confidence,
                is_final,
            } => {
                if !is_final {
                    debug!(confidence = confidence, "Interim: {}", transcript);
                    return;
                }
                info!(confidence = confidence, "Heard: {}", transcript);
                self.handle_transcript(transcript);
            }
            RecognitionEvent::Error(code) => {
                warn!("Recognition error: {:?}", code);
                self.finish(Some(code.to_string()));
            }
            RecognitionEvent::End => {
                debug!("Recognition ended");
                self.finish(None);
            }
        }
    }

    fn handle_transcript(&self, transcript: String) {
        let options = self.shared.listening.lock().options.clone();
        if let Some(callback) = options.on_result.as_ref() {
            callback(&transcript);
        }
        if options.mode != ListenMode::Command {
            return;
        }

        let handler = self.shared.handler.lock().clone();
        let Some(handler) = handler else {
            debug!("No transcript handler, dropping: {}", transcript);
            return;
        };
        let command = VoiceCommand::parse(&transcript);
        if command.is_none() && !self.shared.config.dispatch_to_backend {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime, dropping transcript: {}", transcript);
            return;
        };
        // The reply round trip outlives the utterance
        runtime.spawn(async move {
            match command {
                Some(command) => handler.run_command(command).await,
                None => handler.dispatch(&transcript).await,
            }
        });
    }

    /// Return to idle and clear the recording flag. Returns the event pump
    /// task so callers that must discard events can abort it.
    fn finish(&self, error: Option<String>) -> Option<JoinHandle<()>> {
        let pump = {
            let mut listening = self.shared.listening.lock();
            if listening.state == RecognitionState::Listening {
                listening.state = RecognitionState::Idle;
            }
            listening.options = ListenOptions::default();
            if let Some(watchdog) = listening.watchdog.take() {
                watchdog.abort();
            }
            listening.pump.take()
        };
        self.shared.store.set_recording(false);
        if let Some(message) = error {
            self.shared.store.set_error(Some(message));
        }
        pump
    }
}

fn abort_tasks(listening: &mut Listening) {
    if let Some(pump) = listening.pump.take() {
        pump.abort();
    }
    if let Some(watchdog) = listening.watchdog.take() {
        watchdog.abort();
    }
}

async fn pump_events(
    session: SpeechRecognitionSession,
    mut events: UnboundedReceiver<RecognitionEvent>,
    id: u64,
) {
    while let Some(event) = events.recv().await {
        if session.shared.utterance.load(Ordering::SeqCst) != id {
            debug!(utterance = id, "Dropping event from stale utterance");
            break;
        }
        let last = matches!(event, RecognitionEvent::End | RecognitionEvent::Error(_));
        session.handle_event(event);
        if last {
            break;
        }
    }
}

async fn watchdog(session: SpeechRecognitionSession, id: u64, limit: Duration) {
    tokio::time::sleep(limit).await;
    if session.shared.utterance.load(Ordering::SeqCst) == id && session.is_listening() {
        info!("Listening for {:?}, stopping", limit);
        if let Err(e) = session.shared.recognizer.stop() {
            debug!("Recognizer stop ignored: {}", e);
        }
        session.shared.store.set_recording(false);
        let mut listening = session.shared.listening.lock();
        listening.state = RecognitionState::Idle;
        listening.options = ListenOptions::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeRecognizer {
        unsupported: bool,
        fail_start: bool,
        channels: Mutex<Vec<UnboundedSender<RecognitionEvent>>>,
        stops: AtomicUsize,
        aborts: AtomicUsize,
    }

    impl FakeRecognizer {
        fn emit(&self, event: RecognitionEvent) {
            if let Some(tx) = self.channels.lock().last() {
                let _ = tx.send(event);
            }
        }
    }

    impl SpeechRecognizer for FakeRecognizer {
        fn is_supported(&self) -> bool {
            !self.unsupported
        }

        fn start(
            &self,
            _config: &RecognitionConfig,
            events: UnboundedSender<RecognitionEvent>,
        ) -> std::result::Result<(), String> {
            if self.fail_start {
                return Err("InvalidStateError".into());
            }
            self.channels.lock().push(events);
            Ok(())
        }

        fn stop(&self) -> std::result::Result<(), String> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            // Host throws when nothing is active
            Err("not started".into())
        }

        fn abort(&self) -> std::result::Result<(), String> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        commands: Mutex<Vec<VoiceCommand>>,
        dispatched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TranscriptHandler for RecordingHandler {
        async fn run_command(&self, command: VoiceCommand) {
            self.commands.lock().push(command);
        }

        async fn dispatch(&self, text: &str) {
            self.dispatched.lock().push(text.to_string());
        }
    }

    fn final_result(text: &str) -> RecognitionEvent {
        RecognitionEvent::Result {
            transcript: text.to_string(),
            confidence: 0.9,
            is_final: true,
        }
    }

    fn setup(
        recognizer: FakeRecognizer,
        config: RecognitionConfig,
    ) -> (
        SpeechRecognitionSession,
        Arc<FakeRecognizer>,
        Arc<RecordingHandler>,
        BehaviorStore,
    ) {
        let recognizer = Arc::new(recognizer);
        let store = BehaviorStore::in_memory();
        let session = SpeechRecognitionSession::new(recognizer.clone(), store.clone(), config);
        let handler = Arc::new(RecordingHandler::default());
        session.set_handler(handler.clone());
        (session, recognizer, handler, store)
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_error_code_messages() {
        assert_eq!(
            RecognitionErrorCode::from_code("no-speech"),
            RecognitionErrorCode::NoSpeech
        );
        assert_eq!(
            RecognitionErrorCode::from_code("not-allowed").to_string(),
            "microphone permission denied"
        );
        assert_eq!(
            RecognitionErrorCode::from_code("bad-grammar").to_string(),
            "recognition failed: bad-grammar"
        );
    }

    #[tokio::test]
    async fn test_unsupported_host() {
        let (session, _rec, _handler, store) = setup(
            FakeRecognizer {
                unsupported: true,
                ..Default::default()
            },
            RecognitionConfig::default(),
        );
        assert_eq!(session.state(), RecognitionState::Unsupported);
        let err = session.start(ListenOptions::command()).unwrap_err();
        assert!(matches!(err, AvatarError::Unsupported(_)));
        assert!(!store.is_recording());
        assert_eq!(store.error().as_deref(), Some(UNSUPPORTED_MESSAGE));
    }

    #[tokio::test]
    async fn test_start_failure_resets_recording() {
        let (session, _rec, _handler, store) = setup(
            FakeRecognizer {
                fail_start: true,
                ..Default::default()
            },
            RecognitionConfig::default(),
        );
        assert!(session.start(ListenOptions::command()).is_err());
        assert!(!store.is_recording());
        assert_eq!(session.state(), RecognitionState::Idle);
        assert_eq!(store.error().as_deref(), Some(START_FAILED_MESSAGE));
    }

    #[tokio::test]
    async fn test_command_transcript_runs_locally() {
        let (session, rec, handler, store) =
            setup(FakeRecognizer::default(), RecognitionConfig::default());
        session.start(ListenOptions::command()).unwrap();
        assert!(store.is_recording());
        assert!(session.is_listening());

        rec.emit(RecognitionEvent::Start);
        rec.emit(final_result("跳舞吧"));
        rec.emit(RecognitionEvent::End);
        settle().await;

        assert_eq!(*handler.commands.lock(), vec![VoiceCommand::Dance]);
        assert!(handler.dispatched.lock().is_empty());
        assert!(!store.is_recording());
        assert_eq!(session.state(), RecognitionState::Idle);
    }

    #[tokio::test]
    async fn test_unmatched_transcript_goes_to_backend() {
        let (session, rec, handler, _store) =
            setup(FakeRecognizer::default(), RecognitionConfig::default());
        let heard = Arc::new(Mutex::new(Vec::new()));
        let sink = heard.clone();
        session
            .start(ListenOptions::command().with_callback(move |t| sink.lock().push(t.to_string())))
            .unwrap();

        rec.emit(RecognitionEvent::Result {
            transcript: "今天".into(),
            confidence: 0.4,
            is_final: false,
        });
        rec.emit(final_result("今天天气怎么样"));
        settle().await;

        assert_eq!(*heard.lock(), vec!["今天天气怎么样".to_string()]);
        assert_eq!(*handler.dispatched.lock(), vec!["今天天气怎么样".to_string()]);
    }

    #[tokio::test]
    async fn test_backend_dispatch_can_be_disabled() {
        let (session, rec, handler, _store) = setup(
            FakeRecognizer::default(),
            RecognitionConfig::default().without_backend_dispatch(),
        );
        session.start(ListenOptions::command()).unwrap();
        rec.emit(final_result("讲个故事"));
        settle().await;
        assert!(handler.dispatched.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dictation_only_reports_text() {
        let (session, rec, handler, _store) =
            setup(FakeRecognizer::default(), RecognitionConfig::default());
        let heard = Arc::new(Mutex::new(Vec::new()));
        let sink = heard.clone();
        session
            .start(
                ListenOptions::dictation().with_callback(move |t| sink.lock().push(t.to_string())),
            )
            .unwrap();
        rec.emit(final_result("暂停"));
        settle().await;

        assert_eq!(heard.lock().len(), 1);
        assert!(handler.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn test_error_event_sets_message_and_resets() {
        let (session, rec, _handler, store) =
            setup(FakeRecognizer::default(), RecognitionConfig::default());
        session.start(ListenOptions::command()).unwrap();
        rec.emit(RecognitionEvent::Error(RecognitionErrorCode::from_code("no-speech")));
        settle().await;

        assert!(!store.is_recording());
        assert_eq!(session.state(), RecognitionState::Idle);
        assert_eq!(
            store.error().as_deref(),
            Some("no speech was detected, please try again")
        );
    }

    #[tokio::test]
    async fn test_stop_and_abort_tolerate_idle() {
        let (session, rec, _handler, store) =
            setup(FakeRecognizer::default(), RecognitionConfig::default());
        session.stop();
        session.abort();
        session.stop();
        assert!(!store.is_recording());
        assert_eq!(rec.stops.load(Ordering::SeqCst), 2);
        assert_eq!(rec.aborts.load(Ordering::SeqCst), 1);

        session.start(ListenOptions::command()).unwrap();
        session.stop();
        assert!(!store.is_recording());
        assert_eq!(session.state(), RecognitionState::Idle);
    }

    #[tokio::test]
    async fn test_abort_discards_pending_results() {
        let (session, rec, handler, _store) =
            setup(FakeRecognizer::default(), RecognitionConfig::default());
        session.start(ListenOptions::command()).unwrap();
        session.abort();
        rec.emit(final_result("跳舞"));
        settle().await;
        assert!(handler.commands.lock().is_empty());
    }

    /// Takes as long as a slow backend round trip
    #[derive(Default)]
    struct SlowHandler {
        dispatched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TranscriptHandler for SlowHandler {
        async fn run_command(&self, _command: VoiceCommand) {}

        async fn dispatch(&self, text: &str) {
            tokio::time::sleep(Duration::from_secs(20)).await;
            self.dispatched.lock().push(text.to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_resets_recording_while_reply_is_pending() {
        let (session, rec, _handler, store) =
            setup(FakeRecognizer::default(), RecognitionConfig::default());
        let slow = Arc::new(SlowHandler::default());
        session.set_handler(slow.clone());

        session.start(ListenOptions::command()).unwrap();
        rec.emit(final_result("今天天气怎么样"));
        rec.emit(RecognitionEvent::End);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!store.is_recording());
        assert_eq!(session.state(), RecognitionState::Idle);
        assert!(slow.dispatched.lock().is_empty());

        // A new utterance reaches the recognizer while the reply is in flight
        session.start(ListenOptions::command()).unwrap();
        assert_eq!(rec.channels.lock().len(), 2);
        assert!(store.is_recording());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(*slow.dispatched.lock(), vec!["今天天气怎么样".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_stops_long_listening() {
        let (session, rec, _handler, store) = setup(
            FakeRecognizer::default(),
            RecognitionConfig::default().with_max_listen_duration(Duration::from_secs(30)),
        );
        session.start(ListenOptions::command()).unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(store.is_recording());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!store.is_recording());
        assert_eq!(session.state(), RecognitionState::Idle);
        assert_eq!(rec.stops.load(Ordering::SeqCst), 1);
    }
}

//! Central behavior state
//!
//! One `BehaviorStore` is created at startup and cloned into every component
//! that reads or writes avatar state. Clones share the same state. Writes are
//! applied immediately and the renderer subscribers are notified after each
//! one; there is no multi-field transaction, so readers may observe a partially
//! applied compound update (for example a new emotion before its expression).

use super::session::{
    generate_session_id, get_or_create_session_id, MemorySessionStorage, SessionStorage,
    SESSION_KEY,
};
use super::types::{Behavior, ChatMessage, ConnectionStatus, Emotion, Expression, Role};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_ANIMATION: &str = "idle";
pub const DEFAULT_EXPRESSION_INTENSITY: f32 = 0.8;

/// Full avatar state
#[derive(Debug, Clone)]
pub struct BehaviorState {
    pub is_playing: bool,
    pub auto_rotate: bool,
    pub current_animation: String,

    pub is_recording: bool,
    pub is_muted: bool,
    pub is_speaking: bool,

    pub current_emotion: Emotion,
    pub current_expression: Expression,
    pub expression_intensity: f32,
    pub current_behavior: Behavior,

    pub session_id: String,
    pub chat_history: Vec<ChatMessage>,

    pub is_connected: bool,
    pub connection_status: ConnectionStatus,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl BehaviorState {
    fn initial(session_id: String) -> Self {
        Self {
            is_playing: false,
            auto_rotate: false,
            current_animation: DEFAULT_ANIMATION.to_string(),
            is_recording: false,
            is_muted: false,
            is_speaking: false,
            current_emotion: Emotion::Neutral,
            current_expression: Expression::Neutral,
            expression_intensity: DEFAULT_EXPRESSION_INTENSITY,
            current_behavior: Behavior::Idle,
            session_id,
            chat_history: Vec::new(),
            is_connected: true,
            connection_status: ConnectionStatus::Connected,
            is_loading: false,
            error: None,
            last_error_time: None,
        }
    }

    pub fn render_state(&self) -> RenderState {
        RenderState {
            current_animation: self.current_animation.clone(),
            current_expression: self.current_expression,
            current_emotion: self.current_emotion,
            expression_intensity: self.expression_intensity,
            is_speaking: self.is_speaking,
            is_playing: self.is_playing,
            auto_rotate: self.auto_rotate,
        }
    }
}

/// The fields the renderer reads every animation frame
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    pub current_animation: String,
    pub current_expression: Expression,
    pub current_emotion: Emotion,
    pub expression_intensity: f32,
    pub is_speaking: bool,
    pub is_playing: bool,
    pub auto_rotate: bool,
}

/// Shared handle to the behavior state
#[derive(Clone)]
pub struct BehaviorStore {
    state: Arc<RwLock<BehaviorState>>,
    subscribers: Arc<Mutex<Vec<Sender<RenderState>>>>,
    storage: Arc<dyn SessionStorage>,
}

impl std::fmt::Debug for BehaviorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorStore")
            .field("state", &*self.state.read())
            .finish()
    }
}

impl Default for BehaviorStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl BehaviorStore {
    /// Create a store whose session id is loaded from (or saved to) `storage`
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        let session_id = get_or_create_session_id(storage.as_ref());
        Self {
            state: Arc::new(RwLock::new(BehaviorState::initial(session_id))),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            storage,
        }
    }

    /// Create a store backed by throwaway in-memory session storage
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStorage::new()))
    }

    /// Clone of the full state
    pub fn snapshot(&self) -> BehaviorState {
        self.state.read().clone()
    }

    /// The renderer-visible subset of the state
    pub fn render_state(&self) -> RenderState {
        self.state.read().render_state()
    }

    /// Receive a fresh `RenderState` after every change
    pub fn subscribe(&self) -> Receiver<RenderState> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn update(&self, f: impl FnOnce(&mut BehaviorState)) {
        let render = {
            let mut state = self.state.write();
            f(&mut state);
            state.render_state()
        };
        // Drop subscribers whose receiver is gone
        self.subscribers
            .lock()
            .retain(|tx| tx.send(render.clone()).is_ok());
    }

    // Accessors

    pub fn is_playing(&self) -> bool {
        self.state.read().is_playing
    }

    pub fn is_recording(&self) -> bool {
        self.state.read().is_recording
    }

    pub fn is_muted(&self) -> bool {
        self.state.read().is_muted
    }

    pub fn is_speaking(&self) -> bool {
        self.state.read().is_speaking
    }

    pub fn current_animation(&self) -> String {
        self.state.read().current_animation.clone()
    }

    pub fn current_emotion(&self) -> Emotion {
        self.state.read().current_emotion
    }

    pub fn current_expression(&self) -> Expression {
        self.state.read().current_expression
    }

    pub fn expression_intensity(&self) -> f32 {
        self.state.read().expression_intensity
    }

    pub fn current_behavior(&self) -> Behavior {
        self.state.read().current_behavior
    }

    pub fn session_id(&self) -> String {
        self.state.read().session_id.clone()
    }

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.state.read().chat_history.clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.state.read().connection_status
    }

    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    // Setters

    pub fn set_playing(&self, playing: bool) {
        self.update(|s| s.is_playing = playing);
    }

    pub fn set_auto_rotate(&self, rotate: bool) {
        self.update(|s| s.auto_rotate = rotate);
    }

    pub fn set_animation(&self, animation: impl Into<String>) {
        let animation = animation.into();
        self.update(|s| s.current_animation = animation);
    }

    pub fn set_recording(&self, recording: bool) {
        self.update(|s| s.is_recording = recording);
    }

    pub fn set_muted(&self, muted: bool) {
        self.update(|s| s.is_muted = muted);
    }

    /// Only the speech synthesis session writes this flag
    pub(crate) fn set_speaking(&self, speaking: bool) {
        self.update(|s| s.is_speaking = speaking);
    }

    pub fn set_emotion(&self, emotion: Emotion) {
        self.update(|s| s.current_emotion = emotion);
    }

    pub fn set_expression(&self, expression: Expression) {
        self.update(|s| s.current_expression = expression);
    }

    /// Clamped to [0, 1]; NaN is stored as 0
    pub fn set_expression_intensity(&self, intensity: f32) {
        let clamped = if intensity.is_nan() {
            0.0
        } else {
            intensity.clamp(0.0, 1.0)
        };
        self.update(|s| s.expression_intensity = clamped);
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        self.update(|s| s.current_behavior = behavior);
    }

    pub fn set_connected(&self, connected: bool) {
        self.update(|s| s.is_connected = connected);
    }

    pub fn set_connection_status(&self, status: ConnectionStatus) {
        self.update(|s| {
            s.connection_status = status;
            s.is_connected = status == ConnectionStatus::Connected;
        });
    }

    pub fn set_loading(&self, loading: bool) {
        self.update(|s| s.is_loading = loading);
    }

    pub fn set_error(&self, error: Option<String>) {
        self.update(|s| {
            s.last_error_time = error.as_ref().map(|_| Utc::now());
            s.error = error;
        });
    }

    pub fn clear_error(&self) {
        self.set_error(None);
    }

    // Session management

    /// Rotate the session id and empty the chat history
    pub fn init_session(&self) {
        let id = generate_session_id();
        self.storage.set(SESSION_KEY, &id);
        debug!("Session rotated to {}", id);
        self.update(|s| {
            s.session_id = id;
            s.chat_history.clear();
        });
    }

    pub fn add_chat_message(&self, role: Role, text: impl Into<String>) {
        let message = ChatMessage::new(role, text);
        self.update(|s| s.chat_history.push(message));
    }

    pub fn clear_chat_history(&self) {
        self.update(|s| s.chat_history.clear());
    }

    // Compound controls

    pub fn play(&self) {
        self.set_playing(true);
    }

    pub fn pause(&self) {
        self.set_playing(false);
    }

    /// Restore playback, animation, emotion, expression and behavior defaults
    /// and clear the error. Chat history and session id are kept.
    pub fn reset(&self) {
        self.update(|s| {
            s.is_playing = false;
            s.current_animation = DEFAULT_ANIMATION.to_string();
            s.current_emotion = Emotion::Neutral;
            s.current_expression = Expression::Neutral;
            s.expression_intensity = DEFAULT_EXPRESSION_INTENSITY;
            s.current_behavior = Behavior::Idle;
            s.error = None;
            s.last_error_time = None;
        });
    }

    pub fn toggle_mute(&self) {
        self.update(|s| s.is_muted = !s.is_muted);
    }

    pub fn toggle_auto_rotate(&self) {
        self.update(|s| s.auto_rotate = !s.auto_rotate);
    }
}

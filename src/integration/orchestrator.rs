//! Orchestrator for the perception-to-behavior pipeline
//!
//! Connects the producers to the avatar: user turns -> dialogue -> engine ->
//! speech, voice commands -> engine, and vision events -> engine.

use crate::avatar::AvatarEngine;
use crate::dialogue::{ChatRequest, ChatResponse, DialogueClient};
use crate::speech::{SpeechSynthesisSession, TranscriptHandler, VoiceCommand};
use crate::store::{BehaviorStore, Emotion, Role};
use crate::vision::{EmotionCallback, MotionCallback, MotionEvent};
use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Events emitted by the conversation
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    /// A user turn was accepted
    UserTurn(String),

    /// A reply was applied to the avatar
    Reply(ChatResponse),

    /// A local voice command ran
    Command(VoiceCommand),

    /// A gesture was mirrored by the avatar
    Gesture(MotionEvent),

    /// Speaking a reply failed; the text is still in the chat history
    SpeechFailed(String),
}

/// Ties the dialogue client, the avatar engine and speech output together
pub struct Conversation {
    engine: Arc<AvatarEngine>,
    dialogue: DialogueClient,
    tts: Option<Arc<SpeechSynthesisSession>>,
    event_tx: Sender<ConversationEvent>,
    event_rx: Receiver<ConversationEvent>,
}

impl Conversation {
    pub fn new(engine: Arc<AvatarEngine>, dialogue: DialogueClient) -> Self {
        let (event_tx, event_rx) = bounded(100);
        Self {
            engine,
            dialogue,
            tts: None,
            event_tx,
            event_rx,
        }
    }

    /// Speak replies and acknowledgements through `tts`
    pub fn with_speech(mut self, tts: Arc<SpeechSynthesisSession>) -> Self {
        self.tts = Some(tts);
        self
    }

    pub fn engine(&self) -> &AvatarEngine {
        &self.engine
    }

    pub fn store(&self) -> &BehaviorStore {
        self.engine.store()
    }

    pub fn dialogue(&self) -> &DialogueClient {
        &self.dialogue
    }

    /// Receiver for conversation events
    pub fn events(&self) -> Receiver<ConversationEvent> {
        self.event_rx.clone()
    }

    /// Try to receive an event
    pub fn try_recv_event(&self) -> Option<ConversationEvent> {
        self.event_rx.try_recv().ok()
    }

    fn emit(&self, event: ConversationEvent) {
        if let Err(TrySendError::Full(event)) = self.event_tx.try_send(event) {
            debug!("Event queue full, dropping {:?}", event);
        }
    }

    /// Record a user turn, send it to the backend and apply the reply.
    ///
    /// Returns `None` for blank input. The reply may be the offline fallback.
    pub async fn submit(&self, text: &str) -> Option<ChatResponse> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let store = self.store();
        store.add_chat_message(Role::User, text);
        self.emit(ConversationEvent::UserTurn(text.to_string()));

        let request = ChatRequest::new(text).with_session(store.session_id());
        store.set_loading(true);
        let response = self.dialogue.send_user_input(&request).await;
        store.set_loading(false);

        self.handle_response(&response).await;
        Some(response)
    }

    /// Apply a reply: chat history, emotion, action, then speech unless muted
    pub async fn handle_response(&self, response: &ChatResponse) {
        let store = self.store();
        if !response.reply_text.is_empty() {
            store.add_chat_message(Role::Assistant, response.reply_text.as_str());
        }
        if !response.emotion.is_empty() {
            self.engine.set_emotion(&response.emotion);
        }
        if !response.action.is_empty() && response.action != "idle" {
            self.engine.play_animation(&response.action, true);
        }
        self.emit(ConversationEvent::Reply(response.clone()));

        if !response.reply_text.is_empty() && !store.is_muted() {
            self.say(&response.reply_text).await;
        }
    }

    /// Run a local voice command and speak its acknowledgement
    pub async fn run_command(&self, command: VoiceCommand) {
        command.execute(&self.engine);
        if command == VoiceCommand::Mute {
            if let Some(tts) = self.tts.as_ref() {
                tts.stop();
            }
        }
        self.emit(ConversationEvent::Command(command));

        if let Some(ack) = command.acknowledgement() {
            if !self.store().is_muted() {
                self.say(ack).await;
            }
        }
    }

    /// Mirror the user's detected emotion. Repeats of the current emotion are
    /// skipped so a steady face does not rewrite the store every frame.
    pub fn on_vision_emotion(&self, emotion: Emotion) {
        if self.store().current_emotion() != emotion {
            debug!("Vision emotion: {}", emotion);
            self.engine.apply_emotion(emotion);
        }
    }

    /// Mirror a detected gesture with the matching animation
    pub fn on_motion(&self, event: MotionEvent) {
        info!("Gesture detected: {}", event);
        self.engine.play_animation(event.animation(), true);
        self.emit(ConversationEvent::Gesture(event));
    }

    /// Callback for `VisionSession::start`
    pub fn emotion_callback(self: &Arc<Self>) -> EmotionCallback {
        let conversation = Arc::clone(self);
        Arc::new(move |emotion| conversation.on_vision_emotion(emotion))
    }

    /// Callback for `VisionSession::start`
    pub fn motion_callback(self: &Arc<Self>) -> MotionCallback {
        let conversation = Arc::clone(self);
        Arc::new(move |event| conversation.on_motion(event))
    }

    async fn say(&self, text: &str) {
        let Some(tts) = self.tts.as_ref() else {
            return;
        };
        if let Err(e) = tts.speak(text).await {
            warn!("Reply not spoken: {}", e);
            self.emit(ConversationEvent::SpeechFailed(e.to_string()));
        }
    }
}

#[async_trait]
impl TranscriptHandler for Conversation {
    async fn run_command(&self, command: VoiceCommand) {
        Conversation::run_command(self, command).await;
    }

    async fn dispatch(&self, text: &str) {
        self.submit(text).await;
    }
}

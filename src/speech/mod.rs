//! Speech input and output
//!
//! This module provides:
//! - Speech recognition sessions with a local voice command table
//! - Speech synthesis sessions that drive the avatar's speaking state

pub mod asr;
pub mod commands;
pub mod tts;

// Re-export commonly used types
pub use asr::{
    ListenMode, ListenOptions, RecognitionConfig, RecognitionErrorCode, RecognitionEvent,
    RecognitionState, SpeechRecognitionSession, SpeechRecognizer, TranscriptHandler,
};
pub use commands::VoiceCommand;
pub use tts::{
    select_voice, SpeechSynthesisSession, SpeechSynthesizer, SynthesisConfig, SynthesisError,
    Utterance, UtteranceEvent, Voice,
};

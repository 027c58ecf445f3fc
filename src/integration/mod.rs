//! Integration layer connecting all components
//!
//! `Conversation` routes user turns, voice commands and vision events to the
//! avatar; `AppConfig` carries the settings for every component.

pub mod config;
pub mod orchestrator;

pub use config::{AppConfig, VisionConfig, API_BASE_URL_ENV};
pub use orchestrator::{Conversation, ConversationEvent};

//! Round trip to the conversational backend
//!
//! A single request/response endpoint with retry, backoff and an offline
//! fallback so the avatar always has something to say.

pub mod client;
pub mod fallback;
pub mod types;

pub use client::{DialogueClient, DialogueConfig, DEFAULT_API_BASE_URL};
pub use fallback::{fallback_response, is_greeting};
pub use types::{ChatRequest, ChatResponse, DialogueApiError};

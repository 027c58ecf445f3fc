//! Wire payloads and API errors for the chat endpoint

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of `POST /v1/chat`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub user_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl ChatRequest {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            session_id: None,
            user_text: user_text.into(),
            meta: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// A reply from the backend or the local fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawChatResponse")]
pub struct ChatResponse {
    pub reply_text: String,
    pub emotion: String,
    pub action: String,
}

impl ChatResponse {
    pub fn new(
        reply_text: impl Into<String>,
        emotion: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            reply_text: reply_text.into(),
            emotion: emotion.into(),
            action: action.into(),
        }
    }
}

/// Response as received; any field may be missing or null
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChatResponse {
    #[serde(default)]
    reply_text: Option<String>,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    action: Option<String>,
}

impl From<RawChatResponse> for ChatResponse {
    fn from(raw: RawChatResponse) -> Self {
        Self {
            reply_text: raw.reply_text.unwrap_or_default(),
            emotion: raw.emotion.unwrap_or_else(|| "neutral".to_string()),
            action: raw.action.unwrap_or_else(|| "idle".to_string()),
        }
    }
}

/// User-facing message for an HTTP status
pub fn status_message(status: u16) -> String {
    let message = match status {
        400 => "bad request, please try again",
        401 => "authentication failed, please refresh",
        403 => "access denied",
        404 => "service not found, please try again later",
        408 => "request timed out, please try again",
        429 => "too many requests, please try again later",
        500 => "internal server error, please try again later",
        502 => "bad gateway, please try again later",
        503 => "service temporarily unavailable, please try again later",
        504 => "gateway timeout, please try again later",
        other => return format!("service error: {}", other),
    };
    message.to_string()
}

/// Server errors, rate limiting and timeouts are worth another attempt
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429 || status == 408
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DialogueApiError {
    pub message: String,
    /// HTTP status, 0 when no response was received
    pub status: u16,
    pub retryable: bool,
}

impl DialogueApiError {
    pub fn from_status(status: u16) -> Self {
        Self {
            message: status_message(status),
            status,
            retryable: is_retryable_status(status),
        }
    }

    pub fn timeout() -> Self {
        Self {
            message: status_message(408),
            status: 408,
            retryable: true,
        }
    }

    pub fn connection() -> Self {
        Self {
            message: "network connection failed, please check your network".to_string(),
            status: 0,
            retryable: true,
        }
    }

    pub fn invalid_response(status: u16) -> Self {
        Self {
            message: "invalid response from the dialogue service".to_string(),
            status,
            retryable: true,
        }
    }
}

impl From<reqwest::Error> for DialogueApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout()
        } else if e.is_decode() {
            Self::invalid_response(e.status().map(|s| s.as_u16()).unwrap_or(0))
        } else {
            Self::connection()
        }
    }
}

impl From<DialogueApiError> for crate::AvatarError {
    fn from(e: DialogueApiError) -> Self {
        crate::AvatarError::DialogueError(e.message)
    }
}

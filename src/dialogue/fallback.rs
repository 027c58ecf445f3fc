//! Offline reply used when the backend cannot be reached

use super::types::ChatResponse;

const GREETING_KEYWORDS: &[&str] = &["你好", "您好", "hello", "hi", "嗨"];

const OFFLINE_GREETING: &str =
    "您好！很高兴见到您。由于网络问题，我目前处于离线模式，但仍然可以进行简单的交互。";
const OFFLINE_APOLOGY: &str = "抱歉，我暂时无法连接到服务器。请检查网络连接后重试，或者稍后再来。";

pub fn is_greeting(text: &str) -> bool {
    let text = text.to_lowercase();
    GREETING_KEYWORDS.iter().any(|k| text.contains(k))
}

/// Deterministic reply: a happy wave for greetings, a neutral apology otherwise
pub fn fallback_response(user_text: &str) -> ChatResponse {
    if is_greeting(user_text) {
        ChatResponse::new(OFFLINE_GREETING, "happy", "wave")
    } else {
        ChatResponse::new(OFFLINE_APOLOGY, "neutral", "idle")
    }
}

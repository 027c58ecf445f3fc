use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Returned when a string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Emotion shown by the avatar (and detected on the user's face)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Surprised,
    Sad,
    Angry,
}

impl Emotion {
    pub const ALL: [Emotion; 5] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Surprised,
        Emotion::Sad,
        Emotion::Angry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Surprised => "surprised",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
        }
    }

    /// Facial expression that accompanies this emotion.
    ///
    /// Neutral has no matching expression; setting it leaves the current
    /// expression alone.
    pub fn matching_expression(&self) -> Option<Expression> {
        match self {
            Emotion::Neutral => None,
            Emotion::Happy => Some(Expression::Smile),
            Emotion::Surprised => Some(Expression::Surprise),
            Emotion::Sad => Some(Expression::Sad),
            Emotion::Angry => Some(Expression::Angry),
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "emotion",
                value: s.to_string(),
            })
    }
}

/// Low-level facial expression driven on the avatar mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    #[default]
    Neutral,
    Smile,
    Laugh,
    Surprise,
    Sad,
    Angry,
    Blink,
    EyebrowRaise,
    EyeBlink,
    MouthOpen,
    HeadNod,
}

impl Expression {
    pub const ALL: [Expression; 11] = [
        Expression::Neutral,
        Expression::Smile,
        Expression::Laugh,
        Expression::Surprise,
        Expression::Sad,
        Expression::Angry,
        Expression::Blink,
        Expression::EyebrowRaise,
        Expression::EyeBlink,
        Expression::MouthOpen,
        Expression::HeadNod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Smile => "smile",
            Expression::Laugh => "laugh",
            Expression::Surprise => "surprise",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Blink => "blink",
            Expression::EyebrowRaise => "eyebrow_raise",
            Expression::EyeBlink => "eye_blink",
            Expression::MouthOpen => "mouth_open",
            Expression::HeadNod => "head_nod",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Expression {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "expression",
                value: s.to_string(),
            })
    }
}

/// High-level activity of the avatar
///
/// The first six variants are the activity states the engine derives from
/// animations; the rest are action names that producers may set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Behavior {
    #[default]
    Idle,
    Greeting,
    Listening,
    Thinking,
    Speaking,
    Excited,
    Wave,
    Greet,
    Think,
    Nod,
    ShakeHead,
    Dance,
    Speak,
    WaveHand,
    RaiseHand,
}

impl Behavior {
    pub const ALL: [Behavior; 15] = [
        Behavior::Idle,
        Behavior::Greeting,
        Behavior::Listening,
        Behavior::Thinking,
        Behavior::Speaking,
        Behavior::Excited,
        Behavior::Wave,
        Behavior::Greet,
        Behavior::Think,
        Behavior::Nod,
        Behavior::ShakeHead,
        Behavior::Dance,
        Behavior::Speak,
        Behavior::WaveHand,
        Behavior::RaiseHand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::Idle => "idle",
            Behavior::Greeting => "greeting",
            Behavior::Listening => "listening",
            Behavior::Thinking => "thinking",
            Behavior::Speaking => "speaking",
            Behavior::Excited => "excited",
            Behavior::Wave => "wave",
            Behavior::Greet => "greet",
            Behavior::Think => "think",
            Behavior::Nod => "nod",
            Behavior::ShakeHead => "shakeHead",
            Behavior::Dance => "dance",
            Behavior::Speak => "speak",
            Behavior::WaveHand => "waveHand",
            Behavior::RaiseHand => "raiseHand",
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Behavior {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "behavior",
                value: s.to_string(),
            })
    }
}

/// State of the link to the dialogue backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Connected,
    Connecting,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the conversation as kept in the chat history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

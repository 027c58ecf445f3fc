pub mod avatar;
pub mod dialogue;
pub mod integration;
pub mod speech;
pub mod store;
pub mod utils;
pub mod vision;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AvatarError {
    #[error("Capture device error: {0}")]
    DeviceError(String),

    #[error("Model load error: {0}")]
    ModelLoadError(String),

    #[error("Recognition error: {0}")]
    RecognitionError(String),

    #[error("Synthesis error: {0}")]
    SynthesisError(String),

    #[error("Dialogue error: {0}")]
    DialogueError(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for AvatarError {
    fn from(e: std::io::Error) -> Self {
        AvatarError::IOError(e.to_string())
    }
}

impl AvatarError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Permission or hardware problems need the user to act
            AvatarError::DeviceError(_) => false,
            AvatarError::ModelLoadError(_) => false,
            AvatarError::RecognitionError(_) => true,
            AvatarError::SynthesisError(_) => true,
            AvatarError::DialogueError(_) => true,
            AvatarError::Unsupported(_) => false,
            AvatarError::IOError(_) => false,
            AvatarError::ConfigError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            AvatarError::DeviceError(reason) => {
                format!("Camera or microphone unavailable: {}", reason)
            }
            AvatarError::ModelLoadError(_) => {
                "Failed to load detection models. Vision features are disabled.".to_string()
            }
            AvatarError::RecognitionError(_) => {
                "Speech recognition failed. Please try again.".to_string()
            }
            AvatarError::SynthesisError(_) => {
                "Speech synthesis failed. The reply is shown as text.".to_string()
            }
            AvatarError::DialogueError(_) => {
                "Conversation service unavailable. Running in offline mode.".to_string()
            }
            AvatarError::Unsupported(feature) => {
                format!("This environment does not support {}.", feature)
            }
            AvatarError::IOError(_) => "File system error occurred.".to_string(),
            AvatarError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AvatarError>;

//! Local voice command table
//!
//! Final transcripts are checked here before anything goes to the dialogue
//! backend. Matching is plain keyword containment, first entry wins, so the
//! table order matters ("unmute" has to be tried before "mute").

use crate::avatar::AvatarEngine;
use crate::store::Emotion;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VoiceCommand {
    Play,
    Pause,
    Reset,
    Mute,
    Unmute,
    Greet,
    Dance,
    Nod,
    ShakeHead,
}

/// Keywords per command, in match order
const COMMAND_TABLE: &[(VoiceCommand, &[&str])] = &[
    (VoiceCommand::Unmute, &["取消静音", "unmute"]),
    (VoiceCommand::Mute, &["静音", "mute"]),
    (VoiceCommand::Reset, &["重置", "reset"]),
    (VoiceCommand::Pause, &["暂停", "停止", "pause", "stop"]),
    (VoiceCommand::Play, &["播放", "开始", "play", "start"]),
    (VoiceCommand::Greet, &["打招呼", "问好", "greet"]),
    (VoiceCommand::Dance, &["跳舞", "dance"]),
    (VoiceCommand::ShakeHead, &["摇头", "shake your head", "shake head"]),
    (VoiceCommand::Nod, &["点头", "nod"]),
];

impl VoiceCommand {
    /// Find the command a transcript asks for
    pub fn parse(transcript: &str) -> Option<Self> {
        let text = transcript.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }
        COMMAND_TABLE
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
            .map(|(command, _)| *command)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceCommand::Play => "play",
            VoiceCommand::Pause => "pause",
            VoiceCommand::Reset => "reset",
            VoiceCommand::Mute => "mute",
            VoiceCommand::Unmute => "unmute",
            VoiceCommand::Greet => "greet",
            VoiceCommand::Dance => "dance",
            VoiceCommand::Nod => "nod",
            VoiceCommand::ShakeHead => "shakeHead",
        }
    }

    /// Spoken acknowledgement, if the command has one
    pub fn acknowledgement(&self) -> Option<&'static str> {
        match self {
            VoiceCommand::Greet => Some("您好！很高兴见到您！"),
            VoiceCommand::Dance => Some("让我为您跳一支舞！"),
            _ => None,
        }
    }

    /// Apply the command's effect on the avatar
    pub fn execute(&self, engine: &AvatarEngine) {
        info!("Voice command: {}", self);
        match self {
            VoiceCommand::Play => engine.play(),
            VoiceCommand::Pause => engine.pause(),
            VoiceCommand::Reset => engine.reset(),
            VoiceCommand::Mute => engine.store().set_muted(true),
            VoiceCommand::Unmute => engine.store().set_muted(false),
            VoiceCommand::Greet => {
                engine.apply_emotion(Emotion::Happy);
                engine.play_animation("greet", true);
            }
            VoiceCommand::Dance => engine.play_animation("dance", true),
            VoiceCommand::Nod => engine.play_animation("nod", true),
            VoiceCommand::ShakeHead => engine.play_animation("shakeHead", true),
        }
    }
}

impl fmt::Display for VoiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Behavior, BehaviorStore, Expression};

    #[test]
    fn test_parse_chinese_keywords() {
        assert_eq!(VoiceCommand::parse("请开始播放"), Some(VoiceCommand::Play));
        assert_eq!(VoiceCommand::parse("暂停一下"), Some(VoiceCommand::Pause));
        assert_eq!(VoiceCommand::parse("重置"), Some(VoiceCommand::Reset));
        assert_eq!(VoiceCommand::parse("跟大家打招呼"), Some(VoiceCommand::Greet));
        assert_eq!(VoiceCommand::parse("跳舞吧"), Some(VoiceCommand::Dance));
        assert_eq!(VoiceCommand::parse("点点头"), Some(VoiceCommand::Nod));
        assert_eq!(VoiceCommand::parse("摇摇头"), Some(VoiceCommand::ShakeHead));
    }

    #[test]
    fn test_unmute_before_mute() {
        assert_eq!(VoiceCommand::parse("取消静音"), Some(VoiceCommand::Unmute));
        assert_eq!(VoiceCommand::parse("静音"), Some(VoiceCommand::Mute));
        assert_eq!(VoiceCommand::parse("Please UNMUTE"), Some(VoiceCommand::Unmute));
    }

    #[test]
    fn test_pause_wins_over_play() {
        assert_eq!(VoiceCommand::parse("暂停播放"), Some(VoiceCommand::Pause));
    }

    #[test]
    fn test_no_command() {
        assert_eq!(VoiceCommand::parse("今天天气怎么样"), None);
        assert_eq!(VoiceCommand::parse("   "), None);
    }

    #[test]
    fn test_execute_greet() {
        let engine = AvatarEngine::new(BehaviorStore::in_memory());
        VoiceCommand::Greet.execute(&engine);
        let state = engine.store().snapshot();
        assert_eq!(state.current_emotion, Emotion::Happy);
        assert_eq!(state.current_expression, Expression::Smile);
        assert_eq!(state.current_animation, "greet");
        assert_eq!(state.current_behavior, Behavior::Greeting);
    }

    #[test]
    fn test_execute_playback_flags() {
        let engine = AvatarEngine::new(BehaviorStore::in_memory());
        VoiceCommand::Pause.execute(&engine);
        assert!(!engine.store().is_playing());
        VoiceCommand::Play.execute(&engine);
        assert!(engine.store().is_playing());
        VoiceCommand::Mute.execute(&engine);
        assert!(engine.store().is_muted());
        VoiceCommand::Unmute.execute(&engine);
        assert!(!engine.store().is_muted());
    }

    #[test]
    fn test_acknowledgements() {
        assert!(VoiceCommand::Greet.acknowledgement().is_some());
        assert!(VoiceCommand::Dance.acknowledgement().is_some());
        assert!(VoiceCommand::Nod.acknowledgement().is_none());
    }
}

use anyhow::{Context, Result};
use digital_human::avatar::AvatarEngine;
use digital_human::dialogue::DialogueClient;
use digital_human::integration::{AppConfig, Conversation};
use digital_human::speech::{
    SpeechSynthesisSession, SpeechSynthesizer, SynthesisError, Utterance, UtteranceEvent, Voice,
    VoiceCommand,
};
use digital_human::store::{BehaviorStore, FileSessionStorage};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Headless synthesizer: prints the utterance and finishes at once
struct ConsoleSynthesizer;

impl SpeechSynthesizer for ConsoleSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        vec![Voice::new("console", "zh-CN")]
    }

    fn speak(
        &self,
        utterance: Utterance,
        events: UnboundedSender<UtteranceEvent>,
    ) -> std::result::Result<(), SynthesisError> {
        let _ = events.send(UtteranceEvent::Start);
        println!("avatar> {}", utterance.text);
        let _ = events.send(UtteranceEvent::End);
        Ok(())
    }

    fn cancel(&self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "digital_human=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => AppConfig::from_env(),
    };
    config.validate().context("invalid configuration")?;

    info!("Starting digital human (backend {})", config.api_base_url);

    let store = BehaviorStore::new(Arc::new(FileSessionStorage::new(&config.session_dir)));
    let engine = Arc::new(AvatarEngine::new(store.clone()));
    let dialogue =
        DialogueClient::new(&config.api_base_url, config.dialogue.clone(), store.clone());

    if dialogue.check_server_health().await {
        info!("Dialogue backend is healthy");
    } else {
        warn!("Dialogue backend unreachable, replies will use the offline fallback");
    }

    let tts = Arc::new(SpeechSynthesisSession::new(
        Arc::new(ConsoleSynthesizer),
        store.clone(),
        config.synthesis.clone(),
    ));
    let conversation = Conversation::new(Arc::clone(&engine), dialogue).with_speech(tts);
    info!("Session {}", store.session_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/state" => {
                println!("{:#?}", store.snapshot());
                continue;
            }
            "/new" => {
                store.init_session();
                info!("New session {}", store.session_id());
                continue;
            }
            _ => {}
        }

        match VoiceCommand::parse(line) {
            Some(command) => conversation.run_command(command).await,
            None => {
                conversation.submit(line).await;
            }
        }

        let render = store.render_state();
        info!(
            animation = %render.current_animation,
            emotion = %render.current_emotion,
            expression = %render.current_expression,
            connection = %store.connection_status(),
            "Avatar state"
        );
        if let Some(error) = store.error() {
            warn!("{}", error);
        }
    }

    engine.reset();
    info!("Goodbye");
    Ok(())
}

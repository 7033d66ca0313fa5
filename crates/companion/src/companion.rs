//! Top-level wiring of the live-session engine to the companion domain.

use crate::emotion::Emotion;
use crate::handler::{CompanionCommand, CompanionHandler};
use crate::memory::{MemoryStore, SessionMemory};
use crate::prompt;
use crate::settings::{CompanionSettings, ReactionIntensity};
use crate::summary::{FrameSummarizer, GeminiSummarizer, MemorySummaryHook};
use crate::tools;
use async_trait::async_trait;
use bytes::Bytes;
use gamepal_live::hooks::{SessionHooks, SessionSetup, SetupSource};
use gamepal_live::transport::WsTransport;
use gamepal_live::{LiveConfig, LiveSession, SessionState};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};

/// Assembles the setup-handshake inputs from settings and memory. Runs on
/// every connect, so a changed voice or a freshly written summary is picked
/// up by the next session or reconnect.
struct CompanionSetup {
    settings: Arc<RwLock<CompanionSettings>>,
    memory: Arc<dyn MemoryStore>,
}

#[async_trait]
impl SetupSource for CompanionSetup {
    async fn load(&self) -> anyhow::Result<SessionSetup> {
        let memory_summary = self.memory.formatted_summaries().await;
        let (voice_name, intensity) = {
            let settings = self.settings.read().await;
            (settings.voice_name.clone(), settings.reaction_intensity)
        };
        Ok(SessionSetup {
            system_instruction: prompt::build_instruction(intensity, memory_summary.as_deref()),
            voice_name,
            tools: tools::live_tools(),
        })
    }
}

/// The companion: one live session plus the observable state the UI renders
/// (expression, detected game, mute, session state).
pub struct Companion {
    session: LiveSession,
    settings: Arc<RwLock<CompanionSettings>>,
    memory: Arc<dyn MemoryStore>,
    emotion_tx: Arc<watch::Sender<Emotion>>,
    game_tx: Arc<watch::Sender<Option<String>>>,
    muted_tx: Arc<watch::Sender<bool>>,
    playback_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl Companion {
    /// Companion against the production transport, summarizer, and an
    /// in-memory session log. Must be called inside a tokio runtime.
    pub fn new(config: LiveConfig) -> Self {
        let summarizer = Arc::new(GeminiSummarizer::new(config.api_key.clone()));
        Self::with_parts(
            config,
            Arc::new(SessionMemory::new()),
            summarizer,
            CompanionSettings::default(),
        )
    }

    /// Companion with injected memory, summarizer, and settings.
    pub fn with_parts(
        config: LiveConfig,
        memory: Arc<dyn MemoryStore>,
        summarizer: Arc<dyn FrameSummarizer>,
        settings: CompanionSettings,
    ) -> Self {
        let settings = Arc::new(RwLock::new(settings));
        let emotion_tx = Arc::new(watch::channel(Emotion::Neutral).0);
        let game_tx = Arc::new(watch::channel(None).0);
        let muted_tx = Arc::new(watch::channel(false).0);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(WsTransport::new(config.url()));
        let handler = Arc::new(CompanionHandler::new(
            Arc::clone(&emotion_tx),
            Arc::clone(&game_tx),
            command_tx,
        ));
        let setup = Arc::new(CompanionSetup {
            settings: Arc::clone(&settings),
            memory: Arc::clone(&memory),
        });
        let end_hook = Arc::new(MemorySummaryHook::new(summarizer, Arc::clone(&memory)));

        let session = LiveSession::spawn(
            config,
            SessionHooks {
                transport,
                setup,
                functions: handler,
                playback: playback_tx,
                end_hook: Some(end_hook),
            },
        );

        tokio::spawn(pump_commands(
            command_rx,
            session.clone(),
            Arc::clone(&emotion_tx),
            Arc::clone(&game_tx),
            Arc::clone(&muted_tx),
        ));

        Self {
            session,
            settings,
            memory,
            emotion_tx,
            game_tx,
            muted_tx,
            playback_rx: Some(playback_rx),
        }
    }

    pub fn start(&self) {
        self.session.start();
    }

    /// Starts only when the auto-start setting is on.
    pub async fn start_if_configured(&self) {
        if self.settings.read().await.auto_start {
            self.session.start();
        }
    }

    pub fn stop(&self) {
        reset_observables(&self.emotion_tx, &self.game_tx, &self.muted_tx);
        self.session.stop();
    }

    pub fn toggle_mute(&self) {
        let muted = *self.muted_tx.borrow();
        self.muted_tx.send_replace(!muted);
    }

    /// Forwards one microphone chunk, unless muted.
    pub fn send_audio(&self, pcm: Bytes) {
        if !*self.muted_tx.borrow() {
            self.session.send_audio(pcm);
        }
    }

    /// Forwards one already-rate-limited camera frame.
    pub fn send_video_frame(&self, jpeg: Bytes) {
        self.session.send_video_frame(jpeg);
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn watch_session_state(&self) -> watch::Receiver<SessionState> {
        self.session.watch_state()
    }

    pub fn watch_response_delayed(&self) -> watch::Receiver<bool> {
        self.session.watch_response_delayed()
    }

    pub fn watch_emotion(&self) -> watch::Receiver<Emotion> {
        self.emotion_tx.subscribe()
    }

    pub fn watch_game_name(&self) -> watch::Receiver<Option<String>> {
        self.game_tx.subscribe()
    }

    pub fn watch_muted(&self) -> watch::Receiver<bool> {
        self.muted_tx.subscribe()
    }

    /// The ordered playback stream of synthesized audio. Yields the receiver
    /// once; the audio-output collaborator owns it from then on.
    pub fn take_playback(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.playback_rx.take()
    }

    pub async fn set_voice_name(&self, name: impl Into<String>) {
        self.settings.write().await.voice_name = name.into();
    }

    pub async fn set_reaction_intensity(&self, intensity: ReactionIntensity) {
        self.settings.write().await.reaction_intensity = intensity;
    }

    pub async fn set_auto_start(&self, enabled: bool) {
        self.settings.write().await.auto_start = enabled;
    }

    pub async fn clear_memory(&self) {
        self.memory.clear().await;
    }
}

fn reset_observables(
    emotion_tx: &watch::Sender<Emotion>,
    game_tx: &watch::Sender<Option<String>>,
    muted_tx: &watch::Sender<bool>,
) {
    emotion_tx.send_replace(Emotion::Neutral);
    game_tx.send_replace(None);
    muted_tx.send_replace(false);
}

/// Carries out requests raised inside function-call handling, off the
/// connection's read path.
async fn pump_commands(
    mut commands: mpsc::UnboundedReceiver<CompanionCommand>,
    session: LiveSession,
    emotion_tx: Arc<watch::Sender<Emotion>>,
    game_tx: Arc<watch::Sender<Option<String>>>,
    muted_tx: Arc<watch::Sender<bool>>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            CompanionCommand::StopSession => {
                reset_observables(&emotion_tx, &game_tx, &muted_tx);
                session.stop();
            }
            CompanionCommand::ToggleMute => {
                let muted = *muted_tx.borrow();
                muted_tx.send_replace(!muted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn companion() -> Companion {
        Companion::with_parts(
            LiveConfig::new("test-key"),
            Arc::new(SessionMemory::new()),
            Arc::new(NoSummarizer),
            CompanionSettings::default(),
        )
    }

    struct NoSummarizer;

    #[async_trait]
    impl FrameSummarizer for NoSummarizer {
        async fn summarize(&self, _frames: &[Bytes]) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn setup_source_folds_settings_and_memory_together() {
        let memory = Arc::new(SessionMemory::new());
        memory.add_summary("found the secret exit").await;
        let settings = Arc::new(RwLock::new(CompanionSettings {
            voice_name: "KORE".to_string(),
            reaction_intensity: ReactionIntensity::High,
            auto_start: false,
        }));
        let setup = CompanionSetup {
            settings,
            memory: memory.clone(),
        };

        let loaded = setup.load().await.unwrap();
        assert_eq!(loaded.voice_name, "KORE");
        assert!(loaded.system_instruction.contains("high energy"));
        assert!(loaded.system_instruction.contains("found the secret exit"));
        assert_eq!(loaded.tools.len(), 2);
    }

    #[tokio::test]
    async fn setup_source_omits_the_memory_section_when_empty() {
        let setup = CompanionSetup {
            settings: Arc::new(RwLock::new(CompanionSettings::default())),
            memory: Arc::new(SessionMemory::new()),
        };
        let loaded = setup.load().await.unwrap();
        assert!(!loaded.system_instruction.contains("earlier sessions"));
    }

    #[tokio::test]
    async fn mute_toggles_and_resets_on_stop() {
        let companion = companion();
        let muted = companion.watch_muted();
        assert!(!*muted.borrow());

        companion.toggle_mute();
        assert!(*muted.borrow());
        companion.toggle_mute();
        assert!(!*muted.borrow());

        companion.toggle_mute();
        companion.stop();
        assert!(!*muted.borrow());
    }

    #[tokio::test]
    async fn stop_resets_the_observables() {
        let companion = companion();
        companion.emotion_tx.send_replace(Emotion::Excited);
        companion.game_tx.send_replace(Some("Tetris".to_string()));

        companion.stop();
        assert_eq!(*companion.watch_emotion().borrow(), Emotion::Neutral);
        assert!(companion.watch_game_name().borrow().is_none());
    }

    #[tokio::test]
    async fn playback_receiver_is_yielded_once() {
        let mut companion = companion();
        assert!(companion.take_playback().is_some());
        assert!(companion.take_playback().is_none());
    }

    #[tokio::test]
    async fn settings_updates_are_visible_to_the_next_load() {
        let companion = companion();
        companion.set_voice_name("PUCK").await;
        companion
            .set_reaction_intensity(ReactionIntensity::Calm)
            .await;
        let settings = companion.settings.read().await;
        assert_eq!(settings.voice_name, "PUCK");
        assert_eq!(settings.reaction_intensity, ReactionIntensity::Calm);
    }

    #[tokio::test]
    async fn auto_start_gates_start_if_configured() {
        let companion = companion();
        companion.start_if_configured().await;
        // Auto-start is off by default; the session must still be idle.
        assert_eq!(companion.session_state(), SessionState::Idle);
    }
}

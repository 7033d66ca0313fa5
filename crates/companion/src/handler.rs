//! Maps the service's function calls onto companion state.

use crate::emotion::Emotion;
use crate::tools::{EMOTION_PREFIX, FN_SET_GAME_NAME, FN_STOP_SESSION, FN_TOGGLE_MUTE};
use gamepal_live::hooks::{FunctionHandler, FunctionOutcome};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Companion-level request raised from inside a function call. The call is
/// answered synchronously; the command is carried out by the companion's
/// own task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompanionCommand {
    StopSession,
    ToggleMute,
}

pub struct CompanionHandler {
    emotion_tx: Arc<watch::Sender<Emotion>>,
    game_tx: Arc<watch::Sender<Option<String>>>,
    commands: mpsc::UnboundedSender<CompanionCommand>,
}

impl CompanionHandler {
    pub(crate) fn new(
        emotion_tx: Arc<watch::Sender<Emotion>>,
        game_tx: Arc<watch::Sender<Option<String>>>,
        commands: mpsc::UnboundedSender<CompanionCommand>,
    ) -> Self {
        Self {
            emotion_tx,
            game_tx,
            commands,
        }
    }
}

impl FunctionHandler for CompanionHandler {
    fn handle(
        &self,
        name: &str,
        call_id: &str,
        args: Option<&Map<String, Value>>,
    ) -> FunctionOutcome {
        debug!(name, call_id, "function call");
        if let Some(wire_name) = name.strip_prefix(EMOTION_PREFIX) {
            self.emotion_tx.send_replace(Emotion::from_wire(wire_name));
            return FunctionOutcome::ok();
        }
        match name {
            FN_SET_GAME_NAME => {
                match args
                    .and_then(|args| args.get("name"))
                    .and_then(Value::as_str)
                {
                    Some(game) => {
                        self.game_tx.send_replace(Some(game.to_string()));
                        FunctionOutcome::ok()
                    }
                    None => FunctionOutcome::Error("missing name argument".to_string()),
                }
            }
            FN_STOP_SESSION => {
                let _ = self.commands.send(CompanionCommand::StopSession);
                FunctionOutcome::ok()
            }
            FN_TOGGLE_MUTE => {
                let _ = self.commands.send(CompanionCommand::ToggleMute);
                FunctionOutcome::ok()
            }
            _ => FunctionOutcome::Error(format!("unknown function: {name}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Rig {
        handler: CompanionHandler,
        emotion_rx: watch::Receiver<Emotion>,
        game_rx: watch::Receiver<Option<String>>,
        commands: mpsc::UnboundedReceiver<CompanionCommand>,
    }

    fn rig() -> Rig {
        let (emotion_tx, emotion_rx) = watch::channel(Emotion::Neutral);
        let (game_tx, game_rx) = watch::channel(None);
        let (command_tx, commands) = mpsc::unbounded_channel();
        Rig {
            handler: CompanionHandler::new(
                Arc::new(emotion_tx),
                Arc::new(game_tx),
                command_tx,
            ),
            emotion_rx,
            game_rx,
            commands,
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn emotion_calls_update_the_expression_once() {
        let mut rig = rig();
        let outcome = rig.handler.handle("setEmotion_HAPPY", "c1", None);
        assert_eq!(outcome, FunctionOutcome::ok());
        assert!(rig.emotion_rx.has_changed().unwrap());
        assert_eq!(*rig.emotion_rx.borrow_and_update(), Emotion::Happy);
        assert!(!rig.emotion_rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn game_name_is_published() {
        let rig = rig();
        let outcome = rig.handler.handle(
            FN_SET_GAME_NAME,
            "c2",
            Some(&args(json!({"name": "Tetris"}))),
        );
        assert_eq!(outcome, FunctionOutcome::ok());
        assert_eq!(rig.game_rx.borrow().as_deref(), Some("Tetris"));
    }

    #[tokio::test]
    async fn missing_game_name_is_a_structured_error() {
        let rig = rig();
        let outcome = rig
            .handler
            .handle(FN_SET_GAME_NAME, "c3", Some(&args(json!({}))));
        assert_eq!(
            outcome,
            FunctionOutcome::Error("missing name argument".to_string())
        );
        assert!(rig.game_rx.borrow().is_none());
    }

    #[tokio::test]
    async fn voice_commands_are_queued_not_executed_inline() {
        let mut rig = rig();
        assert_eq!(
            rig.handler.handle(FN_STOP_SESSION, "c4", None),
            FunctionOutcome::ok()
        );
        assert_eq!(
            rig.handler.handle(FN_TOGGLE_MUTE, "c5", None),
            FunctionOutcome::ok()
        );
        assert_eq!(rig.commands.recv().await, Some(CompanionCommand::StopSession));
        assert_eq!(rig.commands.recv().await, Some(CompanionCommand::ToggleMute));
    }

    #[tokio::test]
    async fn unknown_functions_still_get_an_answer() {
        let rig = rig();
        let outcome = rig.handler.handle("teleport", "c6", None);
        assert_eq!(
            outcome,
            FunctionOutcome::Error("unknown function: teleport".to_string())
        );
    }
}

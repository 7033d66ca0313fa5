//! Collaborator seams injected into the session engine.
//!
//! The engine talks to the rest of the application exclusively through the
//! types here: nothing is wired up through ambient state.

use crate::protocol::Tool;
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inputs assembled for one setup handshake.
#[derive(Clone, Debug)]
pub struct SessionSetup {
    /// Instruction payload, already including any prior-session summary.
    pub system_instruction: String,
    /// Prebuilt voice to speak with.
    pub voice_name: String,
    /// Tools declared to the service.
    pub tools: Vec<Tool>,
}

/// Supplies the setup inputs. Called on every connect attempt, so persona
/// or memory changes between reconnects are picked up.
#[async_trait]
pub trait SetupSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<SessionSetup>;
}

/// Result of handling one function call.
#[derive(Clone, Debug, PartialEq)]
pub enum FunctionOutcome {
    /// Structured success payload sent back verbatim.
    Success(Map<String, Value>),
    /// Handler-level failure; still answered, as a structured error payload.
    Error(String),
}

impl FunctionOutcome {
    /// The conventional `{"success": true}` payload.
    pub fn ok() -> Self {
        let mut payload = Map::new();
        payload.insert("success".to_string(), Value::Bool(true));
        FunctionOutcome::Success(payload)
    }

    /// Payload for the tool response envelope.
    pub fn into_payload(self) -> Map<String, Value> {
        match self {
            FunctionOutcome::Success(payload) => payload,
            FunctionOutcome::Error(message) => {
                let mut payload = Map::new();
                payload.insert("error".to_string(), Value::String(message));
                payload
            }
        }
    }
}

/// Handles one function call from the service.
///
/// Must be quick and must not block on I/O: calls are dispatched in arrival
/// order on the connection's read path, and the service stalls turn-taking
/// until every call has been answered. Long-running follow-up work belongs
/// in a task the implementation spawns itself.
pub trait FunctionHandler: Send + Sync {
    fn handle(&self, name: &str, call_id: &str, args: Option<&Map<String, Value>>)
    -> FunctionOutcome;
}

/// Receives the buffered recent video frames when the session is stopped.
#[async_trait]
pub trait SessionEndHook: Send + Sync {
    async fn on_session_end(&self, frames: Vec<Bytes>);
}

/// Everything the session engine is wired to.
pub struct SessionHooks {
    /// Socket factory.
    pub transport: Arc<dyn Transport>,
    /// Setup-handshake inputs, re-read on every connect.
    pub setup: Arc<dyn SetupSource>,
    /// Tool-call dispatcher.
    pub functions: Arc<dyn FunctionHandler>,
    /// Ordered playback sink for inbound audio chunks.
    pub playback: mpsc::UnboundedSender<Bytes>,
    /// Invoked with the recent-frame buffer on stop.
    pub end_hook: Option<Arc<dyn SessionEndHook>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_payload_is_the_success_convention() {
        let payload = FunctionOutcome::ok().into_payload();
        assert_eq!(payload.get("success"), Some(&Value::Bool(true)));
    }

    #[test]
    fn error_payload_is_structured() {
        let payload = FunctionOutcome::Error("unknown function: x".to_string()).into_payload();
        assert_eq!(
            payload.get("error"),
            Some(&Value::String("unknown function: x".to_string()))
        );
    }
}

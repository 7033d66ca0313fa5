//! Multiplexes the two outbound media streams and demultiplexes the inbound
//! message stream of one connection.
//!
//! Outbound: microphone audio and camera frames are wrapped into realtime
//! input envelopes and dropped silently while the socket is not open;
//! backpressure is the producer's job (the camera pipeline throttles its own
//! capture rate). Inbound: audio chunks go to an unbounded, order-preserving
//! playback channel with wire chunk boundaries intact; tool calls are
//! dispatched synchronously in arrival order and every one of them is
//! answered; control messages are handed back to the session layer.

use crate::hooks::FunctionHandler;
use crate::protocol::{
    self, ClientMessage, FunctionCall, FunctionResponse, MediaChunk, RealtimeInput, ServerContent,
    ServerEvent, ToolResponse,
};
use crate::transport::{ConnectionState, TransportHandle};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const AUDIO_MIME_TYPE: &str = "audio/pcm;rate=16000";
pub const VIDEO_MIME_TYPE: &str = "image/jpeg";

/// Inbound message that the session layer, not this one, must act on.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    SetupComplete,
    ResumptionUpdate {
        new_handle: Option<String>,
        resumable: bool,
    },
    GoAway {
        time_left: Option<String>,
    },
}

/// Stream multiplexer for one connection. Cheap to clone; clones share the
/// underlying transport handle and sinks.
#[derive(Clone)]
pub struct StreamMux {
    transport: TransportHandle,
    playback: mpsc::UnboundedSender<Bytes>,
    functions: Arc<dyn FunctionHandler>,
}

impl StreamMux {
    pub fn new(
        transport: TransportHandle,
        playback: mpsc::UnboundedSender<Bytes>,
        functions: Arc<dyn FunctionHandler>,
    ) -> Self {
        Self {
            transport,
            playback,
            functions,
        }
    }

    /// Sends one microphone PCM chunk. Silently dropped unless connected.
    pub fn send_audio(&self, pcm: &[u8]) -> bool {
        self.send_media(AUDIO_MIME_TYPE, pcm)
    }

    /// Sends one encoded camera frame. Fire-and-forget: the service never
    /// acknowledges frames and no flow control is assumed.
    pub fn send_video_frame(&self, jpeg: &[u8]) -> bool {
        self.send_media(VIDEO_MIME_TYPE, jpeg)
    }

    fn send_media(&self, mime_type: &str, data: &[u8]) -> bool {
        if self.transport.state() != ConnectionState::Connected {
            return false;
        }
        let message = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: mime_type.to_string(),
                data: BASE64.encode(data),
            }],
        });
        self.send_message(&message)
    }

    /// Sends the answer for one function call.
    pub fn send_tool_response(
        &self,
        call_id: &str,
        name: &str,
        payload: Map<String, Value>,
    ) -> bool {
        let message = ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: call_id.to_string(),
                name: name.to_string(),
                response: payload,
            }],
        });
        self.send_message(&message)
    }

    fn send_message(&self, message: &ClientMessage) -> bool {
        match protocol::encode(message) {
            Ok(text) => self.transport.send(text),
            Err(e) => {
                warn!(error = %e, "failed to encode outbound message");
                false
            }
        }
    }

    /// Routes one inbound wire message. Audio and tool calls are consumed
    /// here; control messages come back for the session layer. Malformed or
    /// unrecognized input is logged and dropped.
    pub fn route(&self, raw: &str) -> Option<ControlEvent> {
        let message = match protocol::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed server message");
                return None;
            }
        };
        match message.into_event()? {
            ServerEvent::SetupComplete => Some(ControlEvent::SetupComplete),
            ServerEvent::ResumptionUpdate {
                new_handle,
                resumable,
            } => Some(ControlEvent::ResumptionUpdate {
                new_handle,
                resumable,
            }),
            ServerEvent::GoAway { time_left } => Some(ControlEvent::GoAway { time_left }),
            ServerEvent::ToolCall(calls) => {
                for call in calls {
                    self.dispatch_call(call);
                }
                None
            }
            ServerEvent::Content(content) => {
                self.route_content(content);
                None
            }
        }
    }

    fn dispatch_call(&self, call: FunctionCall) {
        let outcome = self
            .functions
            .handle(&call.name, &call.id, call.args.as_ref());
        // The service blocks turn-taking until every call is answered, so an
        // unsendable response is worth shouting about.
        if !self.send_tool_response(&call.id, &call.name, outcome.into_payload()) {
            warn!(name = %call.name, call_id = %call.id, "tool response could not be sent");
        }
    }

    fn route_content(&self, content: ServerContent) {
        if content.interrupted == Some(true) {
            debug!("server content marked interrupted");
        }
        let Some(parts) = content.model_turn.and_then(|turn| turn.parts) else {
            return;
        };
        for part in parts {
            let Some(inline) = part.inline_data else {
                continue;
            };
            if !inline.mime_type.starts_with("audio/") {
                continue;
            }
            match BASE64.decode(&inline.data) {
                Ok(pcm) => {
                    // Receiver gone means playback was torn down; nothing to do.
                    let _ = self.playback.send(Bytes::from(pcm));
                }
                Err(e) => warn!(error = %e, "dropping undecodable audio chunk"),
            }
        }
    }
}

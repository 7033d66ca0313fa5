//! Wire envelopes for the bidirectional generate-content WebSocket.
//!
//! Every serde rename in this module is part of the service contract, not a
//! style choice. The v1alpha endpoint schema-validates strictly and rejects
//! unexpected keys, which is also why absent optionals are omitted instead
//! of serialized as `null`. The contract itself mixes casings (compare
//! `generation_config` with `contextWindowCompression` in the same setup
//! payload), and a past SDK release that "normalized" the function-parameter
//! field names broke the handshake outright. Leave the names exactly as they
//! are.

use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// --- Client → service ---

/// One complete client→service message. Serializes as a single-key object
/// (`{"setup":…}`, `{"realtime_input":…}`, `{"tool_response":…}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    pub model: String,
    #[serde(rename = "generation_config")]
    pub generation_config: GenerationConfig,
    #[serde(
        rename = "system_instruction",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(
        rename = "contextWindowCompression",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub context_window_compression: Option<ContextWindowCompression>,
    #[serde(
        rename = "sessionResumption",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_resumption: Option<SessionResumption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(rename = "response_modalities")]
    pub response_modalities: Vec<String>,
    #[serde(
        rename = "speech_config",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(rename = "voice_config")]
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(rename = "prebuilt_voice_config")]
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrebuiltVoiceConfig {
    #[serde(rename = "voice_name")]
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// A tool entry in the setup message: either a set of callable functions or
/// a built-in search grounding tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(
        rename = "functionDeclarations",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub function_declarations: Option<Vec<FunctionDeclaration>>,
    #[serde(
        rename = "google_search",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub google_search: Option<GoogleSearch>,
}

impl Tool {
    pub fn functions(declarations: Vec<FunctionDeclaration>) -> Self {
        Self {
            function_declarations: Some(declarations),
            google_search: None,
        }
    }

    pub fn google_search() -> Self {
        Self {
            function_declarations: None,
            google_search: Some(GoogleSearch {}),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleSearch {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<FunctionParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameters {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, PropertySchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindowCompression {
    #[serde(rename = "slidingWindow")]
    pub sliding_window: SlidingWindow,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlidingWindow {
    #[serde(
        rename = "targetTokens",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionResumption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeInput {
    #[serde(rename = "media_chunks")]
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaChunk {
    #[serde(rename = "mime_type")]
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(rename = "function_responses")]
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Map<String, Value>,
}

// --- Service → client ---

/// One service→client message as it appears on the wire. The service
/// populates at most one of these fields per message; anything it adds in
/// newer revisions is ignored rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(
        rename = "setupComplete",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub setup_complete: Option<SetupComplete>,
    #[serde(
        rename = "serverContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub server_content: Option<ServerContent>,
    #[serde(rename = "toolCall", default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(
        rename = "sessionResumptionUpdate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_resumption_update: Option<SessionResumptionUpdate>,
    #[serde(rename = "goAway", default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerContent {
    #[serde(rename = "modelTurn", default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<ServerPart>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerPart {
    #[serde(
        rename = "inlineData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub inline_data: Option<InlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(
        rename = "functionCalls",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub function_calls: Option<Vec<FunctionCall>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionResumptionUpdate {
    #[serde(rename = "newHandle", default, skip_serializing_if = "Option::is_none")]
    pub new_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumable: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoAway {
    #[serde(rename = "timeLeft", default, skip_serializing_if = "Option::is_none")]
    pub time_left: Option<String>,
}

/// A recognized server message, reduced to the variant that was populated.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    Content(ServerContent),
    ToolCall(Vec<FunctionCall>),
    ResumptionUpdate {
        new_handle: Option<String>,
        resumable: bool,
    },
    GoAway {
        time_left: Option<String>,
    },
}

impl ServerMessage {
    /// Reduces the wire struct to its populated variant, or `None` for a
    /// message carrying nothing this client understands (droppable).
    pub fn into_event(self) -> Option<ServerEvent> {
        if self.setup_complete.is_some() {
            Some(ServerEvent::SetupComplete)
        } else if let Some(tool_call) = self.tool_call {
            Some(ServerEvent::ToolCall(
                tool_call.function_calls.unwrap_or_default(),
            ))
        } else if let Some(update) = self.session_resumption_update {
            Some(ServerEvent::ResumptionUpdate {
                new_handle: update.new_handle,
                resumable: update.resumable.unwrap_or(false),
            })
        } else if let Some(go_away) = self.go_away {
            Some(ServerEvent::GoAway {
                time_left: go_away.time_left,
            })
        } else {
            self.server_content.map(ServerEvent::Content)
        }
    }
}

/// Serializes a client message. Deterministic: the same logical envelope
/// always produces the same bytes (struct field order, sorted property maps).
pub fn encode(message: &ClientMessage) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(CodecError::Encode)
}

/// Parses one inbound wire message. Errors are droppable, never fatal.
pub fn decode(raw: &str) -> Result<ServerMessage, CodecError> {
    serde_json::from_str(raw).map_err(CodecError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_setup() -> ClientMessage {
        let mut properties = BTreeMap::new();
        properties.insert(
            "name".to_string(),
            PropertySchema {
                kind: "STRING".to_string(),
                description: None,
            },
        );
        ClientMessage::Setup(Setup {
            model: "models/gemini-test".to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: "AOEDE".to_string(),
                        },
                    },
                }),
            },
            system_instruction: Some(SystemInstruction {
                parts: vec![Part {
                    text: "hello".to_string(),
                }],
            }),
            tools: Some(vec![
                Tool::functions(vec![FunctionDeclaration {
                    name: "setGameName".to_string(),
                    description: "d".to_string(),
                    parameters: Some(FunctionParameters {
                        kind: "OBJECT".to_string(),
                        properties: Some(properties),
                        required: Some(vec!["name".to_string()]),
                    }),
                }]),
                Tool::google_search(),
            ]),
            context_window_compression: Some(ContextWindowCompression {
                sliding_window: SlidingWindow::default(),
            }),
            session_resumption: Some(SessionResumption {
                handle: Some("tok".to_string()),
            }),
        })
    }

    #[test]
    fn setup_uses_pinned_field_names() {
        let encoded = encode(&full_setup()).unwrap();
        let expected = concat!(
            r#"{"setup":{"model":"models/gemini-test","#,
            r#""generation_config":{"response_modalities":["AUDIO"],"#,
            r#""speech_config":{"voice_config":{"prebuilt_voice_config":{"voice_name":"AOEDE"}}}},"#,
            r#""system_instruction":{"parts":[{"text":"hello"}]},"#,
            r#""tools":[{"functionDeclarations":[{"name":"setGameName","description":"d","#,
            r#""parameters":{"type":"OBJECT","properties":{"name":{"type":"STRING"}},"required":["name"]}}]},"#,
            r#"{"google_search":{}}],"#,
            r#""contextWindowCompression":{"slidingWindow":{}},"#,
            r#""sessionResumption":{"handle":"tok"}}}"#,
        );
        assert_eq!(encoded, expected);
    }

    #[test]
    fn encoding_is_deterministic() {
        let first = encode(&full_setup()).unwrap();
        let second = encode(&full_setup()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn absent_optionals_are_omitted_not_null() {
        let message = ClientMessage::Setup(Setup {
            model: "models/m".to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: None,
            },
            system_instruction: None,
            tools: None,
            context_window_compression: None,
            session_resumption: None,
        });
        let encoded = encode(&message).unwrap();
        assert_eq!(
            encoded,
            r#"{"setup":{"model":"models/m","generation_config":{"response_modalities":["AUDIO"]}}}"#
        );
        assert!(!encoded.contains("null"));
    }

    #[test]
    fn realtime_input_encodes_media_chunks() {
        let message = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: "AAAA".to_string(),
            }],
        });
        assert_eq!(
            encode(&message).unwrap(),
            r#"{"realtime_input":{"media_chunks":[{"mime_type":"audio/pcm;rate=16000","data":"AAAA"}]}}"#
        );
    }

    #[test]
    fn tool_response_encodes_function_responses() {
        let mut payload = Map::new();
        payload.insert("success".to_string(), Value::Bool(true));
        let message = ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: "c1".to_string(),
                name: "setEmotion_HAPPY".to_string(),
                response: payload,
            }],
        });
        assert_eq!(
            encode(&message).unwrap(),
            r#"{"tool_response":{"function_responses":[{"id":"c1","name":"setEmotion_HAPPY","response":{"success":true}}]}}"#
        );
    }

    #[test]
    fn client_messages_round_trip() {
        let message = full_setup();
        let decoded: ClientMessage = serde_json::from_str(&encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn decodes_setup_complete() {
        let message = decode(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(message.into_event(), Some(ServerEvent::SetupComplete));
    }

    #[test]
    fn decodes_tool_call_in_order() {
        let raw = r#"{"toolCall":{"functionCalls":[
            {"id":"c1","name":"setEmotion_HAPPY"},
            {"id":"c2","name":"setGameName","args":{"name":"Tetris"}}
        ]}}"#;
        let event = decode(raw).unwrap().into_event().unwrap();
        match event {
            ServerEvent::ToolCall(calls) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "c1");
                assert_eq!(calls[0].name, "setEmotion_HAPPY");
                assert!(calls[0].args.is_none());
                assert_eq!(calls[1].id, "c2");
                assert_eq!(
                    calls[1].args.as_ref().unwrap()["name"],
                    Value::String("Tetris".to_string())
                );
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn decodes_resumption_update() {
        let raw = r#"{"sessionResumptionUpdate":{"newHandle":"h-1","resumable":true}}"#;
        assert_eq!(
            decode(raw).unwrap().into_event(),
            Some(ServerEvent::ResumptionUpdate {
                new_handle: Some("h-1".to_string()),
                resumable: true,
            })
        );
    }

    #[test]
    fn decodes_go_away() {
        let raw = r#"{"goAway":{"timeLeft":"10s"}}"#;
        assert_eq!(
            decode(raw).unwrap().into_event(),
            Some(ServerEvent::GoAway {
                time_left: Some("10s".to_string()),
            })
        );
    }

    #[test]
    fn decodes_server_content_audio_parts() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm","data":"AAA="}},
            {"text":"aside"}
        ]}}}"#;
        let event = decode(raw).unwrap().into_event().unwrap();
        match event {
            ServerEvent::Content(content) => {
                let parts = content.model_turn.unwrap().parts.unwrap();
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[0].inline_data.as_ref().unwrap().mime_type, "audio/pcm");
                assert_eq!(parts[1].text.as_deref(), Some("aside"));
            }
            other => panic!("expected content, got {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = r#"{"setupComplete":{},"somethingNew":{"x":1}}"#;
        assert_eq!(
            decode(raw).unwrap().into_event(),
            Some(ServerEvent::SetupComplete)
        );
    }

    #[test]
    fn unrecognized_message_is_droppable_not_an_error() {
        let message = decode(r#"{"usageMetadata":{"tokens":12}}"#).unwrap();
        assert_eq!(message.into_event(), None);
    }

    #[test]
    fn malformed_input_yields_droppable_error() {
        for raw in ["", "not json", "{\"setup", "[1,2,3]", "\"text\""] {
            assert!(matches!(decode(raw), Err(CodecError::Malformed(_))));
        }
    }
}

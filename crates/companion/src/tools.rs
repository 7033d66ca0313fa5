//! Function declarations offered to the service at setup time.

use crate::emotion::Emotion;
use gamepal_live::protocol::{FunctionDeclaration, FunctionParameters, PropertySchema, Tool};
use std::collections::BTreeMap;

pub const EMOTION_PREFIX: &str = "setEmotion_";
pub const FN_SET_GAME_NAME: &str = "setGameName";
pub const FN_STOP_SESSION: &str = "stopSession";
pub const FN_TOGGLE_MUTE: &str = "toggleMute";

/// The companion's tool set: one expression setter per emotion, the game
/// recognizer, the two voice commands, and search grounding.
pub fn live_tools() -> Vec<Tool> {
    let mut declarations: Vec<FunctionDeclaration> = Emotion::ALL
        .into_iter()
        .map(|emotion| FunctionDeclaration {
            name: format!("{EMOTION_PREFIX}{}", emotion.wire_name()),
            description: emotion.tool_description().to_string(),
            parameters: None,
        })
        .collect();

    let mut properties = BTreeMap::new();
    properties.insert(
        "name".to_string(),
        PropertySchema {
            kind: "STRING".to_string(),
            description: Some("Title of the game being played".to_string()),
        },
    );
    declarations.push(FunctionDeclaration {
        name: FN_SET_GAME_NAME.to_string(),
        description: "Set the title of the game on screen; call again when the game changes"
            .to_string(),
        parameters: Some(FunctionParameters {
            kind: "OBJECT".to_string(),
            properties: Some(properties),
            required: Some(vec!["name".to_string()]),
        }),
    });
    declarations.push(FunctionDeclaration {
        name: FN_STOP_SESSION.to_string(),
        description: "End the session; call when the user says they are done or asks to stop"
            .to_string(),
        parameters: None,
    });
    declarations.push(FunctionDeclaration {
        name: FN_TOGGLE_MUTE.to_string(),
        description: "Toggle the microphone mute; call when the user asks for quiet or to be heard again"
            .to_string(),
        parameters: None,
    });

    vec![Tool::functions(declarations), Tool::google_search()]
}

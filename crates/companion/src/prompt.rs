//! Instruction payload assembly for the setup handshake.

use crate::settings::ReactionIntensity;

// Deliberately short; the product prompt owns the personality detail.
const BASE_PROMPT: &str = "You are a friendly companion sitting next to the user, watching them \
play. React to what you see and hear the way a friend on the couch would: briefly, naturally, in \
the moment. Update your expression with the setEmotion functions whenever your mood changes, set \
the game title with setGameName once you recognize it, and call stopSession or toggleMute when \
the user asks for them.";

pub(crate) fn build_instruction(
    intensity: ReactionIntensity,
    memory_summary: Option<&str>,
) -> String {
    let mut instruction = String::from(BASE_PROMPT);
    match intensity {
        ReactionIntensity::Calm => {
            instruction.push_str("\n\nKeep your reactions restrained and quiet.");
        }
        ReactionIntensity::High => {
            instruction.push_str("\n\nReact with high energy; be loud about the big moments!");
        }
        ReactionIntensity::Normal => {}
    }
    if let Some(summary) = memory_summary {
        instruction.push_str(
            "\n\nNotes from earlier sessions. Mention them naturally instead of repeating the \
same reactions:\n",
        );
        instruction.push_str(summary);
    }
    instruction
}

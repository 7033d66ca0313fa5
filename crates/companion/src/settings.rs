//! Session-start configuration supplied by the host application.
//!
//! These are plain values read at each connect; where they are stored
//! between runs is outside this crate.

/// How strongly the companion reacts to what it sees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReactionIntensity {
    Calm,
    #[default]
    Normal,
    High,
}

#[derive(Clone, Debug)]
pub struct CompanionSettings {
    /// Prebuilt voice the service speaks with.
    pub voice_name: String,
    pub reaction_intensity: ReactionIntensity,
    /// Start a session as soon as the host is ready.
    pub auto_start: bool,
}

impl Default for CompanionSettings {
    fn default() -> Self {
        Self {
            voice_name: "AOEDE".to_string(),
            reaction_intensity: ReactionIntensity::Normal,
            auto_start: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_configuration() {
        let settings = CompanionSettings::default();
        assert_eq!(settings.voice_name, "AOEDE");
        assert_eq!(settings.reaction_intensity, ReactionIntensity::Normal);
        assert!(!settings.auto_start);
    }
}

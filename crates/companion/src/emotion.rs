//! Expression states driven by the service's function calls.

/// The companion's facial expression. One `setEmotion_*` function is
/// declared to the service per variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Excited,
    Surprised,
    Thinking,
    Worried,
    Sad,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Excited,
        Emotion::Surprised,
        Emotion::Thinking,
        Emotion::Worried,
        Emotion::Sad,
    ];

    /// Name used in the `setEmotion_*` function declarations.
    pub fn wire_name(self) -> &'static str {
        match self {
            Emotion::Neutral => "NEUTRAL",
            Emotion::Happy => "HAPPY",
            Emotion::Excited => "EXCITED",
            Emotion::Surprised => "SURPRISED",
            Emotion::Thinking => "THINKING",
            Emotion::Worried => "WORRIED",
            Emotion::Sad => "SAD",
        }
    }

    /// Parses a wire name case-insensitively. Unknown values fall back to
    /// neutral rather than failing.
    pub fn from_wire(value: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|emotion| emotion.wire_name().eq_ignore_ascii_case(value))
            .unwrap_or_default()
    }

    pub(crate) fn tool_description(self) -> &'static str {
        match self {
            Emotion::Neutral => "Set the expression to calm and neutral",
            Emotion::Happy => "Set the expression to happy",
            Emotion::Excited => "Set the expression to excited or thrilled",
            Emotion::Surprised => "Set the expression to surprised",
            Emotion::Thinking => "Set the expression to thinking things over",
            Emotion::Worried => "Set the expression to worried or anxious",
            Emotion::Sad => "Set the expression to sad or disappointed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for emotion in Emotion::ALL {
            assert_eq!(Emotion::from_wire(emotion.wire_name()), emotion);
        }
    }

    #[test]
    fn parsing_ignores_case() {
        assert_eq!(Emotion::from_wire("happy"), Emotion::Happy);
        assert_eq!(Emotion::from_wire("Surprised"), Emotion::Surprised);
    }

    #[test]
    fn unknown_values_fall_back_to_neutral() {
        assert_eq!(Emotion::from_wire("FURIOUS"), Emotion::Neutral);
        assert_eq!(Emotion::from_wire(""), Emotion::Neutral);
    }
}

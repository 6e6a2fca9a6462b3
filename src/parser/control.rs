use serde::Serialize;

/// Queue control words. The vocabulary is a closed set, matched
/// case-insensitively against the whole instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Stop,
    Pause,
    Resume,
    Clear,
    Status,
}

pub fn parse_control(text: &str) -> Option<ControlKind> {
    let normalized = text.trim().to_lowercase();
    match normalized.as_str() {
        "stop" | "stop automation" | "cancel" => Some(ControlKind::Stop),
        "pause" | "pause automation" | "hold" => Some(ControlKind::Pause),
        "resume" | "continue" | "resume automation" => Some(ControlKind::Resume),
        "clear" | "clear queue" | "reset" => Some(ControlKind::Clear),
        "status" | "queue status" => Some(ControlKind::Status),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_whole_vocabulary_parses() {
        for (word, kind) in [
            ("stop", ControlKind::Stop),
            ("Stop Automation", ControlKind::Stop),
            ("CANCEL", ControlKind::Stop),
            ("pause", ControlKind::Pause),
            ("hold", ControlKind::Pause),
            ("resume", ControlKind::Resume),
            ("continue", ControlKind::Resume),
            ("clear queue", ControlKind::Clear),
            ("reset", ControlKind::Clear),
            ("queue status", ControlKind::Status),
        ] {
            assert_eq!(parse_control(word), Some(kind), "word: {}", word);
        }
    }

    #[test]
    fn non_control_text_is_rejected() {
        assert_eq!(parse_control("stop at the red light"), None);
        assert_eq!(parse_control("continue to checkout"), None);
        assert_eq!(parse_control(""), None);
    }
}

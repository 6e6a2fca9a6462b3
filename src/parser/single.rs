//! Deterministic single-command rules, used when no LLM is configured and
//! as the safety net when the LLM response cannot be interpreted.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::Action;

fn nav_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:go to|navigate to|visit|open)\s+(\S+)").expect("valid regex")
    })
}

fn type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:type|enter|input)\s+(.+?)\s+(?:in|into)\s+(?:the\s+)?(.+?)(?:\s+field)?\s*$")
            .expect("valid regex")
    })
}

fn click_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:click|press|tap)\s+(?:on\s+)?(.+?)\s*$").expect("valid regex")
    })
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).expect("valid regex"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex")
    })
}

fn formatted_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{3}\.\d{3}\.\d{3}-\d{2}\b").expect("valid regex"))
}

fn password_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bpassword\s+(\S+)").expect("valid regex"))
}

/// Map an instruction to a single action without AI. Order: navigation,
/// typed input, click.
pub fn parse_single(text: &str) -> Option<Action> {
    let trimmed = text.trim();

    if let Some(cap) = nav_re().captures(trimmed) {
        let target = cap[1].trim_end_matches(['.', ',', '!', ';']);
        return Some(Action::navigate(target));
    }

    if let Some(cap) = type_re().captures(trimmed) {
        let raw_value = cap[1].to_string();
        let context = cap[2].trim().to_string();
        let value = extract_typed_text(trimmed, &raw_value);
        return Some(Action::type_into(context, value));
    }

    if let Some(cap) = click_re().captures(trimmed) {
        return Some(Action::click_text(cap[1].trim()));
    }

    None
}

/// The text to type, extracted in priority order: quoted substring, email,
/// formatted identifier, password-word-then-token, then the raw phrase
/// after the verb.
pub fn extract_typed_text(full_text: &str, raw_value: &str) -> String {
    if let Some(cap) = quoted_re().captures(full_text) {
        let quoted = cap.get(1).or_else(|| cap.get(2)).expect("alternation");
        return quoted.as_str().to_string();
    }
    if let Some(m) = email_re().find(full_text) {
        return m.as_str().to_string();
    }
    if let Some(m) = formatted_id_re().find(full_text) {
        return m.as_str().to_string();
    }
    if let Some(cap) = password_token_re().captures(full_text) {
        // "in password field" phrasing names the target, not the secret.
        let token = &cap[1];
        if !matches!(token.to_lowercase().as_str(), "field" | "box" | "input") {
            return token.to_string();
        }
    }
    raw_value.trim_matches(['"', '\'']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_verbs_map_to_navigate() {
        for text in [
            "go to example.com",
            "Navigate to example.com",
            "visit example.com",
            "open example.com!",
        ] {
            match parse_single(text) {
                Some(Action::Navigate { url }) => assert_eq!(url, "https://example.com"),
                other => panic!("{:?} from {:?}", other, text),
            }
        }
    }

    #[test]
    fn click_captures_the_target_text() {
        match parse_single("Click the Sign in button") {
            Some(Action::Click { search_text, .. }) => {
                assert_eq!(search_text.as_deref(), Some("the Sign in button"));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn type_captures_value_and_context() {
        match parse_single("Type alice in username field") {
            Some(Action::Type {
                text,
                search_context,
                ..
            }) => {
                assert_eq!(text, "alice");
                assert_eq!(search_context.as_deref(), Some("username"));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn quoted_text_wins_extraction() {
        match parse_single(r#"Enter "hello world" in the search field"#) {
            Some(Action::Type { text, .. }) => assert_eq!(text, "hello world"),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn emails_and_formatted_ids_are_extracted() {
        match parse_single("Type a.user@b.test in email field") {
            Some(Action::Type { text, .. }) => assert_eq!(text, "a.user@b.test"),
            other => panic!("{:?}", other),
        }
        match parse_single("Enter 381.151.977-85 in the cpf field") {
            Some(Action::Type { text, .. }) => assert_eq!(text, "381.151.977-85"),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn password_token_extraction() {
        let value = extract_typed_text("use password Akad@2025 to log in", "whatever");
        assert_eq!(value, "Akad@2025");
    }

    #[test]
    fn password_field_phrasing_keeps_the_value() {
        match parse_single("Type Akad@2025 in password field") {
            Some(Action::Type {
                text,
                search_context,
                ..
            }) => {
                assert_eq!(text, "Akad@2025");
                assert_eq!(search_context.as_deref(), Some("password"));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn unknown_text_yields_nothing() {
        assert!(parse_single("the weather is nice").is_none());
    }
}

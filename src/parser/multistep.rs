//! Multi-step instruction detection and splitting.
//!
//! Numbered lists, bullet lists, bolded step names and dense keyword-bearing
//! prose all count as multi-step. Informational lines (headings, rules,
//! quotes, "leave as default", "verify ...") are dropped; URLs and
//! credential bullets are rewritten into executable step strings.

use regex::Regex;
use std::sync::OnceLock;

pub const ACTION_KEYWORDS: &[&str] = &[
    "navigate", "go to", "visit", "open", "click", "press", "tap", "select", "type", "enter",
    "input", "fill", "wait", "login", "submit", "search", "download",
];

fn numbered_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+\.").expect("valid regex"))
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*[^*]+\*\*").expect("valid regex"))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s)>\]]+").expect("valid regex"))
}

fn credential_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(username|user|login|e-?mail|password|pass|senha)\s*[:=]\s*(.+)$")
            .expect("valid regex")
    })
}

fn is_bullet(line: &str) -> bool {
    matches!(line.chars().next(), Some('-' | '*' | '•')) && !line.starts_with("**")
}

pub fn contains_action_keyword(line: &str) -> bool {
    let lower = line.to_lowercase();
    ACTION_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Whether the text reads as a sequence of steps.
pub fn is_multi_step(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let numbered = lines.iter().filter(|l| numbered_re().is_match(l)).count();
    if numbered >= 2 {
        return true;
    }

    let bullets = lines.iter().filter(|l| is_bullet(l)).count();
    if bullets >= 2 {
        return true;
    }

    if bold_re().find_iter(text).count() >= 2 {
        return true;
    }

    let keyword_lines = lines
        .iter()
        .filter(|l| contains_action_keyword(l))
        .count();
    lines.len() > 3 && keyword_lines >= 2
}

/// Split a multi-step instruction into individual step strings.
pub fn split_steps(text: &str) -> Vec<String> {
    let mut steps = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || is_informational(line) {
            continue;
        }

        // A line carrying several bolded step names splits into one step
        // per segment.
        let bolded: Vec<&str> = bold_re()
            .find_iter(line)
            .map(|m| m.as_str().trim_matches('*').trim())
            .collect();
        if bolded.len() >= 2 {
            steps.extend(bolded.into_iter().map(str::to_string));
            continue;
        }

        // Strip list markers before interpreting the content.
        let content = if let Some(m) = numbered_re().find(line) {
            line[m.end()..].trim()
        } else if is_bullet(line) {
            line[line.char_indices().nth(1).map(|(i, _)| i).unwrap_or(1)..].trim()
        } else {
            line
        };
        let content = content.replace("**", "");
        let content = content.trim();
        if content.is_empty() {
            continue;
        }

        // Credential bullets become explicit type steps.
        if let Some(cap) = credential_re().captures(content) {
            let field = cap[1].to_lowercase();
            let value = cap[2].trim();
            let field = if field.starts_with("pass") || field == "senha" {
                "password"
            } else if field.starts_with("e") {
                "email"
            } else {
                "username"
            };
            steps.push(format!("Type {} in {} field", value, field));
            continue;
        }

        if contains_action_keyword(content) {
            steps.push(content.to_string());
            continue;
        }

        // A bare URL still deserves a navigation step.
        if let Some(url) = url_re().find(content) {
            steps.push(format!("Navigate to {}", url.as_str()));
        }
    }

    steps
}

fn is_informational(line: &str) -> bool {
    let lower = line.to_lowercase();
    line.starts_with('#')
        || line.starts_with('>')
        || line.chars().all(|c| matches!(c, '-' | '=' | '_' | '*')) && line.len() >= 3
        || lower.starts_with("verify")
        || (lower.contains("leave") && lower.contains("default"))
        || lower.starts_with("note:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_numbered_lines_are_multi_step() {
        assert!(is_multi_step("1. Go to a.test\n2. Click login"));
    }

    #[test]
    fn one_numbered_line_is_not() {
        assert!(!is_multi_step("1. Go to a.test"));
    }

    #[test]
    fn bullets_and_bold_count() {
        assert!(is_multi_step("- click here\n- type there"));
        assert!(is_multi_step("**Open the page** then **Submit the form**"));
    }

    #[test]
    fn dense_keyword_prose_counts() {
        let text = "first\nnavigate to the page\nthen click the button\nand done\nok";
        assert!(is_multi_step(text));
    }

    #[test]
    fn splits_numbered_and_credential_bullets() {
        let text = "1. Navigate to https://a.test\n2. Click Sign in\n- Username: alice\n- Password: s3cret";
        let steps = split_steps(text);
        assert_eq!(
            steps,
            vec![
                "Navigate to https://a.test",
                "Click Sign in",
                "Type alice in username field",
                "Type s3cret in password field",
            ]
        );
    }

    #[test]
    fn informational_lines_are_dropped() {
        let text = "# Login flow\n---\n1. Open https://a.test\n> just a note\nVerify the page loaded\n2. Click Login\nLeave the domain as default";
        let steps = split_steps(text);
        assert_eq!(steps, vec!["Open https://a.test", "Click Login"]);
    }

    #[test]
    fn bold_segments_split_into_steps() {
        let steps = split_steps("**Open the page** then **Submit the form**");
        assert_eq!(steps, vec!["Open the page", "Submit the form"]);
    }

    #[test]
    fn bare_urls_become_navigation_steps() {
        let steps = split_steps("1. https://a.test/start\n2. Click Go");
        assert_eq!(steps[0], "Navigate to https://a.test/start");
    }

    #[test]
    fn email_credentials_target_the_email_field() {
        let steps = split_steps("- Email: a@b.test\n- Password: x");
        assert_eq!(steps[0], "Type a@b.test in email field");
    }
}

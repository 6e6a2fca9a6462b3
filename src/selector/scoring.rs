//! Candidate scoring: a static priority from element shape plus four match
//! strategies evaluated in order against the instruction tokens.

use super::candidates::ElementCandidate;

/// Words that describe the action rather than the element.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "on", "in", "into", "to", "of", "at", "and", "then", "click", "press",
    "tap", "type", "enter", "input", "go", "visit", "open", "navigate", "select", "field",
    "button", "link", "box",
];

const SEMANTIC_KEYWORDS: &[&str] = &["login", "search", "submit", "cancel", "next", "back"];

/// Static element priority, independent of the instruction.
pub fn priority(c: &ElementCandidate) -> i32 {
    let mut score = match c.tag.as_str() {
        "button" => 10,
        "input" => 8,
        "select" | "textarea" => 7,
        "a" => 6,
        _ => 0,
    };
    if !c.id.is_empty() {
        score += 5;
    }
    if !c.test_id.is_empty() {
        score += 4;
    }
    if !c.name.is_empty() {
        score += 3;
    }
    if !c.aria_label.is_empty() {
        score += 3;
    }
    if !c.placeholder.is_empty() {
        score += 2;
    }
    if c.clickable {
        score += 3;
    }
    if c.tabindex >= 0 {
        score += 2;
    }
    if c.y < 500.0 {
        score += 2;
        if c.y < 200.0 {
            score += 1;
        }
    }
    score
}

/// Instruction tokens that describe the element.
pub fn tokenize(instruction: &str) -> Vec<String> {
    instruction
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|t| t.len() >= 2 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Strategy 1: exact semantic match against identifying attributes.
pub fn exact_score(tokens: &[String], c: &ElementCandidate) -> f32 {
    let mut best: f32 = 0.0;
    for token in tokens {
        for (attr, weight) in [
            (&c.id, 0.9),
            (&c.test_id, 0.9),
            (&c.name, 0.85),
            (&c.aria_label, 0.8),
        ] {
            if !attr.is_empty() && attr.to_lowercase().contains(token.as_str()) {
                best = best.max(weight);
            }
        }
    }
    best
}

/// Strategy 2: token-set overlap over all textual attributes, with
/// Levenshtein half-credit and semantic bonuses.
pub fn fuzzy_score(instruction: &str, tokens: &[String], c: &ElementCandidate) -> f32 {
    if tokens.is_empty() {
        return 0.0;
    }

    let element_tokens: Vec<String> = c
        .text_fields()
        .iter()
        .flat_map(|field| tokenize(field))
        .collect();

    let mut matched = 0.0f32;
    for token in tokens {
        if element_tokens.iter().any(|et| et == token) {
            matched += 1.0;
        } else if token.len() >= 3
            && element_tokens
                .iter()
                .any(|et| et.len() >= 3 && strsim::levenshtein(token, et) <= 2)
        {
            matched += 0.5;
        }
    }
    let mut score = matched / tokens.len() as f32;

    // Semantic keyword agreement.
    let instruction_lower = instruction.to_lowercase();
    let element_blob = element_tokens.join(" ");
    for keyword in SEMANTIC_KEYWORDS {
        if instruction_lower.contains(keyword) && element_blob.contains(keyword) {
            score += 0.2;
            break;
        }
    }

    // Tag-action congruence.
    let wants_click = ["click", "press", "tap"]
        .iter()
        .any(|v| instruction_lower.contains(v));
    let wants_type = ["type", "enter", "input", "fill"]
        .iter()
        .any(|v| instruction_lower.contains(v));
    if wants_click && matches!(c.tag.as_str(), "button" | "a") {
        score += 0.1;
    }
    if wants_type && matches!(c.tag.as_str(), "input" | "textarea") {
        score += 0.1;
    }

    score
}

/// Instruction intent, for the context-aware strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Intent {
    pub is_login: bool,
    pub is_search: bool,
    pub is_submit: bool,
}

impl Intent {
    pub fn of(instruction: &str) -> Self {
        let lower = instruction.to_lowercase();
        Self {
            is_login: lower.contains("login") || lower.contains("log in") || lower.contains("sign in"),
            is_search: lower.contains("search"),
            is_submit: lower.contains("submit") || lower.contains("send"),
        }
    }
}

/// Strategy 3: intent boosts layered on a damped fuzzy base.
pub fn context_score(instruction: &str, tokens: &[String], c: &ElementCandidate) -> f32 {
    let intent = Intent::of(instruction);
    let mut score = fuzzy_score(instruction, tokens, c) * 0.5;

    if intent.is_login
        && c.tag == "input"
        && matches!(c.input_type.as_str(), "password" | "email" | "text")
    {
        score += 0.3;
    }
    if intent.is_search
        && c.tag == "input"
        && (c.input_type == "search" || c.placeholder.to_lowercase().contains("search"))
    {
        score += 0.3;
    }
    if intent.is_submit && (c.input_type == "submit" || c.tag == "button") {
        score += 0.3;
    }
    score
}

/// The axis-word of the position strategy, if any.
pub fn positional_word(instruction: &str) -> Option<&'static str> {
    let lower = instruction.to_lowercase();
    ["first", "last", "top", "bottom", "left", "right"]
        .into_iter()
        .find(|word| lower.split_whitespace().any(|t| t == *word))
}

/// Strategy 4: among candidates passing a loose fuzzy bar, pick the
/// extremum along the named axis. Returns the index into `indices`.
pub fn positional_pick(
    word: &str,
    candidates: &[ElementCandidate],
    indices: &[usize],
) -> Option<usize> {
    if indices.is_empty() {
        return None;
    }
    let key = |i: &usize| {
        let c = &candidates[*i];
        match word {
            "top" | "first" => (c.y, c.x),
            "bottom" | "last" => (-c.y, -c.x),
            "left" => (c.x, c.y),
            "right" => (-c.x, c.y),
            _ => (c.y, c.x),
        }
    };
    indices
        .iter()
        .min_by(|a, b| key(a).partial_cmp(&key(b)).unwrap_or(std::cmp::Ordering::Equal))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button(text: &str, id: &str, y: f64) -> ElementCandidate {
        ElementCandidate {
            tag: "button".into(),
            id: id.into(),
            text: text.into(),
            y,
            clickable: true,
            tabindex: 0,
            width: 100.0,
            height: 30.0,
            nth_of_type: 1,
            ..Default::default()
        }
    }

    #[test]
    fn priority_weights_add_up() {
        let c = button("Sign in", "signin", 100.0);
        // button 10 + id 5 + clickable 3 + tabindex 2 + y<500 2 + y<200 1
        assert_eq!(priority(&c), 23);
    }

    #[test]
    fn tokenize_drops_action_words() {
        assert_eq!(tokenize("Click the Login button"), vec!["login"]);
        assert_eq!(
            tokenize("type alice in username field"),
            vec!["alice", "username"]
        );
    }

    #[test]
    fn exact_match_on_id_scores_high() {
        let c = button("", "login-button", 100.0);
        let tokens = tokenize("click login");
        assert!(exact_score(&tokens, &c) >= 0.9);
    }

    #[test]
    fn fuzzy_matches_text_content() {
        let c = button("Sign in to your account", "", 100.0);
        let tokens = tokenize("click Sign in");
        let score = fuzzy_score("click Sign in", &tokens, &c);
        assert!(score > 0.3, "score = {}", score);
    }

    #[test]
    fn fuzzy_gives_half_credit_for_typos() {
        let c = button("Submit", "", 100.0);
        let tokens = vec!["sumbit".to_string()];
        let score = fuzzy_score("click sumbit", &tokens, &c);
        assert!((0.5..1.0).contains(&score), "score = {}", score);
    }

    #[test]
    fn login_intent_boosts_password_inputs() {
        let password = ElementCandidate {
            tag: "input".into(),
            input_type: "password".into(),
            ..Default::default()
        };
        let tokens = tokenize("login");
        let score = context_score("type password and login", &tokens, &password);
        assert!(score >= 0.3, "score = {}", score);
    }

    #[test]
    fn positional_pick_finds_extrema() {
        let candidates = vec![
            button("A", "", 300.0),
            button("B", "", 50.0),
            button("C", "", 700.0),
        ];
        let indices = vec![0, 1, 2];
        assert_eq!(positional_pick("top", &candidates, &indices), Some(1));
        assert_eq!(positional_pick("bottom", &candidates, &indices), Some(2));
        assert_eq!(positional_word("click the first button"), Some("first"));
        assert_eq!(positional_word("click submit"), None);
    }
}

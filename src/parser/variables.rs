//! `${NAME} value` definition blocks and the pure token rewriter.
//!
//! Names are uppercase identifiers; a value runs until the next `${` or the
//! end of the string and is trimmed. `${lowercase}` is not a token.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::models::Variable;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid regex"))
}

fn pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{[A-Z_][A-Z0-9_]*\}\s+\S+").expect("valid regex"))
}

/// A definition block needs at least two `${NAME} value` pairs.
pub fn is_definition_block(text: &str) -> bool {
    pair_re().find_iter(text).count() >= 2
}

/// Parse every `${NAME} value` pair. Values are trimmed; empty values are
/// dropped.
pub fn parse_definitions(text: &str) -> Vec<Variable> {
    let tokens: Vec<(String, usize)> = token_re()
        .captures_iter(text)
        .map(|cap| {
            let whole = cap.get(0).expect("match");
            (cap[1].to_string(), whole.end())
        })
        .collect();

    let starts: Vec<usize> = token_re().find_iter(text).map(|m| m.start()).collect();

    let mut variables = Vec::new();
    for (i, (name, value_start)) in tokens.iter().enumerate() {
        let value_end = starts.get(i + 1).copied().unwrap_or(text.len());
        let value = text[*value_start..value_end].trim();
        if value.is_empty() {
            continue;
        }
        variables.push(Variable::new(name.clone(), value));
    }
    variables
}

/// Rewrite fully-formed `${NAME}` tokens using the given bindings.
///
/// Returns the names of tokens with no binding; the caller surfaces those
/// as a validation error at enqueue time, never at execute time.
pub fn substitute(text: &str, bindings: &HashMap<String, String>) -> Result<String, Vec<String>> {
    let mut unresolved = Vec::new();
    let rewritten = token_re().replace_all(text, |cap: &regex::Captures<'_>| {
        let name = &cap[1];
        match bindings.get(name) {
            Some(value) => value.clone(),
            None => {
                unresolved.push(name.to_string());
                cap[0].to_string()
            }
        }
    });

    if unresolved.is_empty() {
        Ok(rewritten.into_owned())
    } else {
        Err(unresolved)
    }
}

/// Summarize defined variables for a chat response, redacting sensitive
/// values.
pub fn describe_definitions(variables: &[Variable]) -> String {
    let listed: Vec<String> = variables
        .iter()
        .map(|v| format!("{}={}", v.name, v.display_value()))
        .collect();
    format!("Variables defined: {}", listed.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_blocks_with_two_pairs() {
        assert!(is_definition_block(
            "${LOGIN_URL} https://a.test ${LOGIN_PASSWORD} s3cret"
        ));
        assert!(!is_definition_block("${LOGIN_URL} https://a.test"));
        assert!(!is_definition_block("plain text"));
    }

    #[test]
    fn rejects_lowercase_and_accepts_mixed_upper() {
        assert!(!is_definition_block("${lowercase} a ${other} b"));
        assert!(is_definition_block("${MIXED_CASE_1} a ${B2} b"));
    }

    #[test]
    fn values_run_to_the_next_token_and_are_trimmed() {
        let vars = parse_definitions(
            "${LOGIN_URL} https://example.test/login ${LOGIN_CPF} 381.151.977-85 ${LOGIN_PASSWORD} Akad@2025",
        );
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[0].name, "LOGIN_URL");
        assert_eq!(vars[0].value, "https://example.test/login");
        assert_eq!(vars[1].value, "381.151.977-85");
        assert_eq!(vars[2].value, "Akad@2025");
        assert!(vars[2].sensitive);
    }

    #[test]
    fn empty_values_are_dropped() {
        let vars = parse_definitions("${A_ONE} ${B_TWO} real value");
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "B_TWO");
    }

    #[test]
    fn substitution_resolves_only_wellformed_tokens() {
        let mut bindings = HashMap::new();
        bindings.insert("EMAIL".to_string(), "a@b.test".to_string());

        let out = substitute("Type ${EMAIL} in email field", &bindings).unwrap();
        assert_eq!(out, "Type a@b.test in email field");

        // Malformed token is literal text, not an unresolved variable.
        let out = substitute("echo ${not_a_token}", &bindings).unwrap();
        assert_eq!(out, "echo ${not_a_token}");
    }

    #[test]
    fn unresolved_tokens_are_reported() {
        let bindings = HashMap::new();
        let err = substitute("Type ${EMAIL} then ${CODE}", &bindings).unwrap_err();
        assert_eq!(err, vec!["EMAIL".to_string(), "CODE".to_string()]);
    }

    #[test]
    fn description_redacts_sensitive_values() {
        let vars = parse_definitions("${USER_EMAIL} a@b.test ${USER_PASSWORD} hunter2");
        let described = describe_definitions(&vars);
        assert!(described.contains("a@b.test"));
        assert!(!described.contains("hunter2"));
    }
}

//! Interpretation of the LLM's instruction classification.

use serde::Deserialize;

use crate::llm::client::strip_code_fences;
use crate::models::Action;

/// The model's verdict, one of five categories plus a selector strategy
/// hint for single commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum LlmVerdict {
    VariableDefinitions,
    MultiStep {
        #[serde(default)]
        steps: Vec<String>,
    },
    SingleCommand {
        command: String,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        strategy: Option<String>,
    },
    Conversation {
        #[serde(default)]
        response: String,
    },
}

/// Parse the model response; tolerant of markdown fences and leading prose.
pub fn interpret(response: &str) -> Option<LlmVerdict> {
    let cleaned = strip_code_fences(response);
    if let Ok(verdict) = serde_json::from_str(cleaned) {
        return Some(verdict);
    }
    // Some models prepend commentary; find the first JSON object.
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    serde_json::from_str(&cleaned[start..=end]).ok()
}

/// Map a single-command verdict to an action.
pub fn command_to_action(
    command: &str,
    target: Option<&str>,
    value: Option<&str>,
) -> Option<Action> {
    match command.to_lowercase().as_str() {
        "navigate" | "goto" | "go_to" => target.map(Action::navigate),
        "click" => target.map(Action::click_text),
        "type" | "fill" | "input" => {
            let text = value?.to_string();
            Some(Action::type_into(target.unwrap_or("input"), text))
        }
        "select" => Some(Action::Select {
            selector: target?.to_string(),
            value: value?.to_string(),
        }),
        "wait" => {
            let duration_ms = value
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1000);
            Some(Action::Wait { duration_ms })
        }
        "screenshot" => Some(Action::Screenshot),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interprets_fenced_single_command() {
        let verdict = interpret(
            "```json\n{\"category\":\"single_command\",\"command\":\"click\",\"target\":\"Sign in\",\"strategy\":\"text\"}\n```",
        )
        .unwrap();
        match verdict {
            LlmVerdict::SingleCommand {
                command, target, ..
            } => {
                assert_eq!(command, "click");
                assert_eq!(target.as_deref(), Some("Sign in"));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn interprets_json_embedded_in_prose() {
        let verdict =
            interpret("Sure! {\"category\":\"conversation\",\"response\":\"hello\"}").unwrap();
        assert!(matches!(verdict, LlmVerdict::Conversation { .. }));
    }

    #[test]
    fn garbage_yields_none() {
        assert!(interpret("no json here").is_none());
    }

    #[test]
    fn commands_map_to_actions() {
        assert!(matches!(
            command_to_action("navigate", Some("a.test"), None),
            Some(Action::Navigate { .. })
        ));
        assert!(matches!(
            command_to_action("type", Some("email"), Some("a@b.c")),
            Some(Action::Type { .. })
        ));
        assert!(command_to_action("type", Some("email"), None).is_none());
        assert!(command_to_action("explode", None, None).is_none());
    }
}

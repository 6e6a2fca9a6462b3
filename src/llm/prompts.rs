/// Prompt for classifying a free-text instruction the deterministic rules
/// could not settle. The model must answer with bare JSON.
pub const PARSE_PROMPT: &str = r#"You classify browser automation instructions.

Answer with a single JSON object and nothing else. The object has a
"category" field with one of these values:

- "variable_definitions": the text defines ${NAME} value pairs.
- "multi_step": the text describes several sequential browser actions.
  Include "steps": an array of single-action instruction strings.
- "single_command": one browser action. Include:
    "command": one of "navigate", "click", "type", "select", "wait",
    "target": what to act on (URL, element description, field name),
    "value": text to type or option to select (omit when not applicable),
    "strategy": one of "id", "name", "label", "placeholder", "text", "visual".
- "conversation": a question or chat, not an action. Include "response":
  a short helpful reply.

Instruction:
"#;

/// Prompt sent with a failed action and a screenshot of the page.
/// The response is free-form guidance; the recovery queries run either way.
pub const FALLBACK_PROMPT: &str = r#"A browser automation step failed and you can see the current page.

Describe, in one or two short sentences, what element the step most
likely intended and how to find it (visible text, role, or position).
Do not apologize and do not restate the error.
"#;

/// Prompt for answering a conversational question about the automation.
pub const GUIDANCE_PROMPT: &str = r#"You are the assistant behind a browser automation tool. Answer the
user's question in at most three sentences. You can navigate, click,
type, select options, wait, take screenshots, record scripts and replay
them with variables like ${LOGIN_URL}.

Question:
"#;

/// Build the fallback prompt body for a failed action.
pub fn fallback_context(action: &str, error: &str, url: &str) -> String {
    format!(
        "{}\nFailed step: {}\nError: {}\nCurrent URL: {}",
        FALLBACK_PROMPT, action, error, url
    )
}

//! The recording buffer: captures each committed action with a screenshot
//! while a session is active, and extracts variables when it stops.
//!
//! The buffer only consumes the queue's commit hook; it never calls back
//! into the queue.

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Action, RecordingSession, Script, ScriptStep, Variable};

#[derive(Default)]
pub struct RecordingBuffer {
    session: Mutex<Option<RecordingSession>>,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a session anchored at the current page. Only one session can
    /// be active.
    pub async fn start(
        &self,
        name: &str,
        description: &str,
        start_url: String,
    ) -> Result<RecordingSession> {
        let mut guard = self.session.lock().await;
        if guard.as_ref().is_some_and(|s| s.is_active) {
            return Err(AppError::RecordingError(
                "A recording session is already active".to_string(),
            ));
        }
        let session = RecordingSession::new(name, description, start_url);
        *guard = Some(session.clone());
        tracing::info!(name = %name, "Recording started");
        Ok(session)
    }

    pub async fn is_active(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.is_active)
    }

    pub async fn session(&self) -> Option<RecordingSession> {
        self.session.lock().await.clone()
    }

    /// Commit hook invoked by the queue after each successful action.
    pub async fn append(
        &self,
        instruction: &str,
        action: &Action,
        screenshot_base64: Option<String>,
    ) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_mut().filter(|s| s.is_active) {
            session.steps.push(ScriptStep {
                instruction: instruction.to_string(),
                action: action.clone(),
                timestamp: Utc::now(),
                screenshot_base64,
            });
            tracing::debug!(
                steps = session.steps.len(),
                "Recorded {}",
                action.describe()
            );
        }
    }

    /// End the session and assemble the script; persistence belongs to the
    /// caller.
    pub async fn stop(&self) -> Result<Script> {
        let mut guard = self.session.lock().await;
        let session = guard
            .take()
            .filter(|s| s.is_active)
            .ok_or_else(|| AppError::RecordingError("No active recording session".to_string()))?;

        let variables = extract_variables(&session.steps);
        let script = Script {
            name: session.name,
            description: session.description,
            start_url: session.start_url,
            created_at: Utc::now(),
            steps: session.steps,
            variables,
        };
        tracing::info!(
            name = %script.name,
            steps = script.steps.len(),
            variables = script.variables.len(),
            "Recording stopped"
        );
        Ok(script)
    }

    pub async fn cancel(&self) {
        *self.session.lock().await = None;
    }
}

/// Pull variables out of a recorded step sequence: one per navigate query
/// parameter and one per typed text, deduplicated by value.
pub fn extract_variables(steps: &[ScriptStep]) -> Vec<Variable> {
    let mut variables: Vec<Variable> = Vec::new();
    let mut generated = 0usize;

    let mut push = |name: String, value: String, description: String| {
        if value.is_empty() || variables.iter().any(|v| v.value == value) {
            return;
        }
        let mut name = name;
        if variables.iter().any(|v| v.name == name) {
            name = format!("{}_{}", name, variables.len() + 1);
        }
        variables.push(Variable::new(name, value).with_description(description));
    };

    for step in steps {
        match &step.action {
            Action::Navigate { url } => {
                for (param, value) in query_params(url) {
                    push(
                        sanitize_name(&param),
                        value,
                        format!("Query parameter '{}'", param),
                    );
                }
            }
            Action::Type {
                text,
                search_context,
                ..
            } => {
                let name = match search_context {
                    Some(context) => sanitize_name(context),
                    None => {
                        generated += 1;
                        format!("VAR_{}", generated)
                    }
                };
                let description = search_context
                    .as_deref()
                    .map(|c| format!("Typed into the {} field", c))
                    .unwrap_or_else(|| "Typed text".to_string());
                push(name, text.clone(), description);
            }
            _ => {}
        }
    }

    variables
}

/// Decoded query parameters of a URL, in order.
fn query_params(url: &str) -> Vec<(String, String)> {
    let Some(query) = url.splitn(2, '?').nth(1) else {
        return Vec::new();
    };
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("").to_string();
            let raw = parts.next().unwrap_or("");
            let value = urlencoding::decode(raw)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            (key, value)
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Uppercase identifier usable as a variable name.
fn sanitize_name(raw: &str) -> String {
    let mut name: String = raw
        .trim()
        .to_uppercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|ch: char| ch.is_ascii_digit()) {
        name = format!("_{}", name);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_step(context: &str, text: &str) -> ScriptStep {
        ScriptStep {
            instruction: format!("Type {} in {} field", text, context),
            action: Action::type_into(context, text),
            timestamp: Utc::now(),
            screenshot_base64: None,
        }
    }

    fn nav_step(url: &str) -> ScriptStep {
        ScriptStep {
            instruction: format!("Navigate to {}", url),
            action: Action::navigate(url),
            timestamp: Utc::now(),
            screenshot_base64: None,
        }
    }

    #[tokio::test]
    async fn lifecycle_start_append_stop() {
        let buffer = RecordingBuffer::new();
        buffer
            .start("login", "Logs in", "https://a.test/".to_string())
            .await
            .unwrap();
        assert!(buffer.is_active().await);

        buffer
            .append("Click Sign in", &Action::click_text("Sign in"), None)
            .await;
        let script = buffer.stop().await.unwrap();
        assert_eq!(script.name, "login");
        assert_eq!(script.steps.len(), 1);
        assert!(!buffer.is_active().await);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let buffer = RecordingBuffer::new();
        buffer
            .start("one", "", "https://a.test/".to_string())
            .await
            .unwrap();
        assert!(buffer
            .start("two", "", "https://a.test/".to_string())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn empty_recording_yields_empty_script() {
        let buffer = RecordingBuffer::new();
        buffer
            .start("empty", "", "https://a.test/".to_string())
            .await
            .unwrap();
        let script = buffer.stop().await.unwrap();
        assert!(script.steps.is_empty());
        assert!(script.variables.is_empty());
    }

    #[tokio::test]
    async fn append_without_session_is_ignored() {
        let buffer = RecordingBuffer::new();
        buffer
            .append("Click X", &Action::click_text("X"), None)
            .await;
        assert!(buffer.stop().await.is_err());
    }

    #[test]
    fn extraction_covers_query_params_and_typed_text() {
        let steps = vec![
            nav_step("https://a.test/login?user=alice&next=%2Fhome"),
            type_step("password", "s3cret"),
        ];
        let vars = extract_variables(&steps);
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[0].name, "USER");
        assert_eq!(vars[0].value, "alice");
        assert_eq!(vars[1].name, "NEXT");
        assert_eq!(vars[1].value, "/home");
        assert_eq!(vars[2].name, "PASSWORD");
        assert!(vars[2].sensitive);
    }

    #[test]
    fn extraction_dedupes_by_value() {
        let steps = vec![
            type_step("username", "alice"),
            type_step("login", "alice"),
            type_step("search", "alice"),
        ];
        let vars = extract_variables(&steps);
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn extraction_is_idempotent() {
        let steps = vec![
            nav_step("https://a.test/?q=rust"),
            type_step("search", "rust books"),
        ];
        let first = extract_variables(&steps);
        let second = extract_variables(&steps);
        assert_eq!(first, second);
    }

    #[test]
    fn typed_text_without_context_gets_generated_names() {
        let steps = vec![ScriptStep {
            instruction: "Type something".to_string(),
            action: Action::Type {
                selector: Some("#field".to_string()),
                fallback_selectors: vec![],
                text: "hello".to_string(),
                search_context: None,
            },
            timestamp: Utc::now(),
            screenshot_base64: None,
        }];
        let vars = extract_variables(&steps);
        assert_eq!(vars[0].name, "VAR_1");
    }
}

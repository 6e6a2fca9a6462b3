//! Executes one typed action against the browser, with retry, backoff and
//! AI-assisted recovery.

pub mod fallback;

pub use fallback::{FallbackAnalytics, FallbackReport};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::EventBroadcaster;
use crate::browser::{stability, Driver, NavWait};
use crate::error::{ErrorKind, ExecutionError};
use crate::events::ServerEvent;
use crate::llm::LanguageModel;
use crate::models::{normalize_url, Action, Variable};
use crate::screenshot::ScreenshotDiffer;
use crate::selector::{self, SelectorEngine};

/// Per-selector visibility wait during click/type ladders.
const VISIBILITY_WAIT: Duration = Duration::from_secs(5);

/// Informational settle after an interaction.
const POST_INTERACTION_SETTLE: Duration = Duration::from_millis(500);

/// Per-instruction-run state, owned by the queue and passed down the call
/// chain. Cleared at the end of every instruction run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub variables: HashMap<String, Variable>,
}

impl ExecutionContext {
    pub fn bind(&mut self, variable: Variable) {
        self.variables.insert(variable.name.clone(), variable);
    }

    pub fn bindings(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|(name, var)| (name.clone(), var.value.clone()))
            .collect()
    }

    /// Pick a variable for a target field by name affinity.
    pub fn variable_for_field(&self, field: &str) -> Option<&Variable> {
        let field = field.to_lowercase();
        let mut names: Vec<&String> = self.variables.keys().collect();
        names.sort();

        let matches_any = |name: &str, needles: &[&str]| {
            let upper = name.to_uppercase();
            needles.iter().any(|n| upper.contains(n))
        };

        if field.contains("password") {
            return names
                .iter()
                .find(|n| matches_any(n.as_str(), &["PASSWORD"]))
                .map(|n| &self.variables[n.as_str()]);
        }
        if field.contains("cpf") || field.contains("email") {
            return names
                .iter()
                .find(|n| matches_any(n.as_str(), &["CPF", "EMAIL", "LOGIN"]))
                .map(|n| &self.variables[n.as_str()]);
        }
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    /// Set when the step only succeeded through the AI fallback.
    pub method: Option<String>,
}

pub struct ActionExecutor {
    driver: Arc<dyn Driver>,
    model: Arc<dyn LanguageModel>,
    broadcaster: EventBroadcaster,
    differ: Arc<ScreenshotDiffer>,
    analytics: Arc<FallbackAnalytics>,
    max_retries: u32,
}

impl ActionExecutor {
    pub fn new(
        driver: Arc<dyn Driver>,
        model: Arc<dyn LanguageModel>,
        broadcaster: EventBroadcaster,
        differ: Arc<ScreenshotDiffer>,
        max_retries: u32,
    ) -> Self {
        Self {
            driver,
            model,
            broadcaster,
            differ,
            analytics: Arc::new(FallbackAnalytics::default()),
            max_retries,
        }
    }

    pub fn analytics(&self) -> Arc<FallbackAnalytics> {
        Arc::clone(&self.analytics)
    }

    /// Run one action to completion: up to `max_retries` attempts with
    /// linear backoff, then the AI fallback for structural/interaction
    /// failures. A fallback success is overall success.
    pub async fn execute(
        &self,
        action: &Action,
        ctx: &ExecutionContext,
    ) -> Result<ExecOutcome, ExecutionError> {
        let label = action.describe();
        let started = std::time::Instant::now();
        let mut last_err: Option<ExecutionError> = None;

        for attempt in 1..=self.max_retries {
            match self.dispatch(action, ctx).await {
                Ok(()) => {
                    tracing::info!(
                        action = %label,
                        attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Action executed"
                    );
                    self.after_success(action).await;
                    return Ok(ExecOutcome::default());
                }
                Err(err) => {
                    let err = err.with_attempt(attempt);
                    if err.kind == ErrorKind::Validation {
                        return Err(err);
                    }
                    tracing::warn!(
                        action = %label,
                        attempt,
                        kind = ?err.kind,
                        "Attempt failed: {}",
                        err.message
                    );
                    self.broadcaster.publish(ServerEvent::warning(format!(
                        "Attempt {}/{} failed for {}: {}",
                        attempt, self.max_retries, label, err.message
                    )));
                    if attempt < self.max_retries {
                        // Linear backoff: 1s x attempt, capped at 5s.
                        tokio::time::sleep(Duration::from_secs(u64::from(attempt).min(5))).await;
                    }
                    last_err = Some(err);
                }
            }
        }

        let err = last_err.expect("at least one attempt ran");

        if err.kind.wants_fallback() {
            match fallback::run_fallback(
                self.driver.as_ref(),
                self.model.as_ref(),
                action,
                &err,
            )
            .await
            {
                Ok(method) => {
                    self.analytics.record(true, &err.message);
                    self.after_success(action).await;
                    return Ok(ExecOutcome {
                        method: Some(method),
                    });
                }
                Err(fallback_err) => {
                    self.analytics.record(false, &err.message);
                    tracing::warn!(action = %label, "Fallback failed: {}", fallback_err);
                }
            }
        }

        Err(err)
    }

    async fn dispatch(&self, action: &Action, ctx: &ExecutionContext) -> Result<(), ExecutionError> {
        let label = action.describe();
        match action {
            Action::Navigate { url } => self.exec_navigate(url, &label).await,
            Action::Click {
                selector,
                fallback_selectors,
                search_text,
                ..
            } => {
                self.exec_click(
                    selector.as_deref(),
                    fallback_selectors,
                    search_text.as_deref(),
                    &label,
                )
                .await?;
                tokio::time::sleep(POST_INTERACTION_SETTLE).await;
                Ok(())
            }
            Action::Type {
                selector,
                fallback_selectors,
                text,
                search_context,
            } => {
                let resolved = self.resolve_type_text(text, search_context.as_deref(), ctx, &label)?;
                self.exec_type(
                    selector.as_deref(),
                    fallback_selectors,
                    search_context.as_deref(),
                    &resolved,
                    &label,
                )
                .await?;
                tokio::time::sleep(POST_INTERACTION_SETTLE).await;
                Ok(())
            }
            Action::Select { selector, value } => {
                self.driver
                    .wait_for_visible(selector, VISIBILITY_WAIT)
                    .await
                    .map_err(|e| ExecutionError::classified(e.to_string(), label.clone()))?;
                self.driver
                    .select_option(selector, value)
                    .await
                    .map_err(|e| ExecutionError::classified(e.to_string(), label.clone()))
            }
            Action::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                Ok(())
            }
            Action::Screenshot => self
                .differ
                .capture(false)
                .await
                .map(|_| ())
                .map_err(|e| ExecutionError::classified(e.to_string(), label)),
        }
    }

    /// Walk the navigation strategy ladder, verify the landing host and
    /// wait for page stability.
    async fn exec_navigate(&self, url: &str, label: &str) -> Result<(), ExecutionError> {
        let url = normalize_url(url);
        let expected_host = host_of(&url);
        let mut last_err: Option<anyhow::Error> = None;

        for wait in NavWait::ladder() {
            match self.driver.goto(&url, wait).await {
                Ok(()) => {
                    if let Ok(current) = self.driver.url().await {
                        let current_host = host_of(&current);
                        if !current_host.contains(&expected_host) {
                            // Redirects are a success with a warning.
                            self.broadcaster.publish(ServerEvent::warning(format!(
                                "Navigation to {} landed on {}",
                                expected_host, current_host
                            )));
                        }
                    }
                    stability::wait_for_stability(self.driver.as_ref(), stability::STABILITY_CAP)
                        .await;
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!("Navigation strategy {:?} failed: {}", wait, e);
                    last_err = Some(e);
                }
            }
        }

        let message = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "navigation failed".to_string());
        Err(ExecutionError::classified(message, label.to_string()))
    }

    /// Try primary and fallback selectors, then the text-based pass.
    async fn exec_click(
        &self,
        selector: Option<&str>,
        fallback_selectors: &[String],
        search_text: Option<&str>,
        label: &str,
    ) -> Result<(), ExecutionError> {
        let mut selectors: Vec<String> = Vec::new();
        let mut needle = search_text.map(str::to_string);

        if let Some(primary) = selector {
            selectors.push(primary.to_string());
            selectors.extend(fallback_selectors.iter().cloned());
        } else if let Some(text) = search_text {
            // No selector yet: resolve against the live page.
            let candidates = selector::harvest(self.driver.as_ref())
                .await
                .unwrap_or_default();
            let plan = SelectorEngine::resolve(text, &candidates);
            selectors.extend(plan.selectors().iter().map(|s| s.to_string()));
            if needle.is_none() {
                needle = plan.search_text;
            }
        }

        if selectors.is_empty() && needle.is_none() {
            return Err(ExecutionError::validation(
                "click carries neither selector nor search text",
                label.to_string(),
            ));
        }

        let tried = selectors.len();
        for sel in &selectors {
            if self
                .driver
                .wait_for_visible(sel, VISIBILITY_WAIT)
                .await
                .is_ok()
                && self.driver.click_selector(sel).await.is_ok()
            {
                return Ok(());
            }
        }

        if let Some(text) = &needle {
            if let Ok(true) = fallback::click_by_contained_text(self.driver.as_ref(), text).await {
                return Ok(());
            }
        }

        Err(ExecutionError::classified(
            format!(
                "selector not found for click ({} selector(s) tried)",
                tried
            ),
            label.to_string(),
        ))
    }

    async fn exec_type(
        &self,
        selector: Option<&str>,
        fallback_selectors: &[String],
        search_context: Option<&str>,
        text: &str,
        label: &str,
    ) -> Result<(), ExecutionError> {
        let mut selectors: Vec<String> = Vec::new();

        if let Some(primary) = selector {
            selectors.push(primary.to_string());
            selectors.extend(fallback_selectors.iter().cloned());
        } else if let Some(context) = search_context {
            selectors = canonical_input_selectors(context);
            if selectors.is_empty() {
                let candidates = selector::harvest(self.driver.as_ref())
                    .await
                    .unwrap_or_default();
                let plan = SelectorEngine::resolve(context, &candidates);
                selectors = plan.selectors().iter().map(|s| s.to_string()).collect();
            }
        }

        if selectors.is_empty() {
            return Err(ExecutionError::validation(
                "type carries neither selector nor field context",
                label.to_string(),
            ));
        }

        let tried = selectors.len();
        for sel in &selectors {
            if self
                .driver
                .wait_for_visible(sel, VISIBILITY_WAIT)
                .await
                .is_err()
            {
                continue;
            }
            // Click to focus, then fill (select-all + replace).
            let _ = self.driver.click_selector(sel).await;
            if self.driver.fill(sel, text).await.is_ok() {
                return Ok(());
            }
        }

        Err(ExecutionError::classified(
            format!("selector not found for type ({} selector(s) tried)", tried),
            label.to_string(),
        ))
    }

    /// `type` must carry non-empty text when popped; an empty text is
    /// resolved from the run's variables by field affinity.
    fn resolve_type_text(
        &self,
        text: &str,
        search_context: Option<&str>,
        ctx: &ExecutionContext,
        label: &str,
    ) -> Result<String, ExecutionError> {
        if !text.is_empty() {
            return Ok(text.to_string());
        }
        if let Some(field) = search_context {
            if let Some(variable) = ctx.variable_for_field(field) {
                return Ok(variable.value.clone());
            }
        }
        Err(ExecutionError::validation(
            "type action has no text and no matching variable",
            label.to_string(),
        ))
    }

    /// Force one broadcast frame after page-changing interactions.
    async fn after_success(&self, action: &Action) {
        if matches!(
            action,
            Action::Navigate { .. } | Action::Click { .. } | Action::Type { .. }
        ) {
            if let Err(e) = self.differ.capture(true).await {
                tracing::debug!("Forced capture failed: {}", e);
            }
        }
    }
}

/// Canonical input selectors for well-known field contexts.
fn canonical_input_selectors(context: &str) -> Vec<String> {
    let context = context.to_lowercase();
    let list: &[&str] = if context.contains("password") {
        &["input[type=\"password\"]"]
    } else if context.contains("email") {
        &["input[type=\"email\"]", "input[name*=\"email\" i]"]
    } else if context.contains("search") {
        &["input[type=\"search\"]", "input[placeholder*=\"search\" i]"]
    } else if context.contains("username") || context.contains("user") {
        &[
            "input[name=\"username\"]",
            "#username",
            "input[type=\"text\"]",
        ]
    } else if context.contains("cpf") {
        &["input[name*=\"cpf\" i]", "#cpf", "input[type=\"text\"]"]
    } else {
        &[]
    };
    list.iter().map(|s| s.to_string()).collect()
}

/// Hostname of a URL, lowercased, `www.` stripped.
fn host_of(url: &str) -> String {
    let rest = url.split("://").nth(1).unwrap_or(url);
    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(rest)
        .split('@')
        .next_back()
        .unwrap_or(rest)
        .split(':')
        .next()
        .unwrap_or(rest);
    host.to_lowercase()
        .trim_start_matches("www.")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction_handles_the_usual_shapes() {
        assert_eq!(host_of("https://www.Example.com/path?q=1"), "example.com");
        assert_eq!(host_of("http://a.test:8080/x"), "a.test");
        assert_eq!(host_of("example.com"), "example.com");
    }

    #[test]
    fn canonical_selectors_cover_known_contexts() {
        assert_eq!(
            canonical_input_selectors("password"),
            vec!["input[type=\"password\"]"]
        );
        assert!(canonical_input_selectors("the email address")[0].contains("email"));
        assert!(canonical_input_selectors("username")
            .contains(&"#username".to_string()));
        assert!(canonical_input_selectors("cpf")[0].contains("cpf"));
        assert!(canonical_input_selectors("somewhere else").is_empty());
    }

    #[test]
    fn variables_resolve_by_field_affinity() {
        let mut ctx = ExecutionContext::default();
        ctx.bind(Variable::new("LOGIN_CPF", "381.151.977-85"));
        ctx.bind(Variable::new("LOGIN_PASSWORD", "Akad@2025"));

        assert_eq!(
            ctx.variable_for_field("password field").unwrap().name,
            "LOGIN_PASSWORD"
        );
        assert_eq!(
            ctx.variable_for_field("cpf input").unwrap().name,
            "LOGIN_CPF"
        );
        assert_eq!(
            ctx.variable_for_field("email").unwrap().name,
            "LOGIN_CPF"
        );
        assert!(ctx.variable_for_field("color").is_none());
    }
}

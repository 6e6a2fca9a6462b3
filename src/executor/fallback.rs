//! AI-assisted recovery, invoked once per failing action at the end of the
//! retry sequence. The model sees the failed step and a screenshot; its
//! guidance is advisory, and the progressively more tolerant element
//! queries run regardless.

use anyhow::{anyhow, Result};
use base64::Engine;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::browser::{Driver, NavWait};
use crate::error::ExecutionError;
use crate::llm::{prompts, LanguageModel};
use crate::models::Action;

/// Soft cap on the model call.
const LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// Monotonic counters for fallback usage, exposed via `report()`.
#[derive(Default)]
pub struct FallbackAnalytics {
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    errors: Mutex<HashMap<String, u64>>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackReport {
    pub total_fallbacks: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    /// Most frequent original error messages, descending.
    pub top_errors: Vec<(String, u64)>,
}

impl FallbackAnalytics {
    pub fn record(&self, success: bool, original_error: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        let mut errors = self.errors.lock().expect("analytics lock");
        *errors.entry(original_error.to_string()).or_insert(0) += 1;
    }

    pub fn report(&self, top_n: usize) -> FallbackReport {
        let total = self.total.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);

        let mut top_errors: Vec<(String, u64)> = self
            .errors
            .lock()
            .expect("analytics lock")
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        top_errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_errors.truncate(top_n);

        FallbackReport {
            total_fallbacks: total,
            successes,
            failures,
            success_rate: if total == 0 {
                0.0
            } else {
                successes as f64 / total as f64
            },
            top_errors,
        }
    }
}

/// Run the fallback for a failed action. `Ok` counts as overall success of
/// the step; the caller records the outcome in the analytics.
pub async fn run_fallback(
    driver: &dyn Driver,
    model: &dyn LanguageModel,
    action: &Action,
    error: &ExecutionError,
) -> Result<String> {
    let current_url = driver.url().await.unwrap_or_default();

    // The screenshot is best-effort; guidance without vision still helps
    // the analytics trail.
    let screenshot = match driver.screenshot_jpeg(60).await {
        Ok(bytes) => Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
        Err(_) => None,
    };

    let prompt = prompts::fallback_context(&error.action, &error.message, &current_url);
    let guidance = tokio::time::timeout(
        LLM_TIMEOUT,
        model.complete(&prompt, screenshot.as_deref()),
    )
    .await
    .map(|r| r.unwrap_or_default())
    .unwrap_or_default();

    if !guidance.is_empty() {
        tracing::debug!(guidance = %guidance, "LLM fallback guidance");
    }

    let result = match action {
        Action::Click {
            search_text,
            selector,
            ..
        } => {
            let needle = search_text
                .clone()
                .or_else(|| selector.clone())
                .unwrap_or_default();
            recover_click(driver, &needle).await.map(|_| "llm_fallback_click")
        }
        Action::Type {
            text,
            search_context,
            ..
        } => recover_type(driver, text, search_context.as_deref())
            .await
            .map(|_| "llm_fallback_type"),
        Action::Navigate { url } => driver
            .goto(url, NavWait::DomContentLoaded)
            .await
            .map(|_| "llm_fallback_navigate"),
        _ => Err(anyhow!("no fallback strategy for this action")),
    };

    let final_url = driver.url().await.unwrap_or_default();
    match result {
        Ok(method) => {
            tracing::info!(
                action = %error.action,
                original_error = %error.message,
                final_url = %final_url,
                method = method,
                "Fallback recovered the step"
            );
            Ok(method.to_string())
        }
        Err(e) => {
            tracing::warn!(
                action = %error.action,
                original_error = %error.message,
                final_url = %final_url,
                "Fallback failed: {}",
                e
            );
            Err(e)
        }
    }
}

/// Pass 1: case-insensitive contains over visible text attributes.
/// Pass 2: role-based selection.
async fn recover_click(driver: &dyn Driver, needle: &str) -> Result<()> {
    if !needle.is_empty() {
        let found = click_by_contained_text(driver, needle).await?;
        if found {
            return Ok(());
        }
    }

    for selector in [
        "button",
        "a",
        "[role=\"button\"]",
        "[role=\"link\"]",
        "[role=\"combobox\"]",
        "[role=\"listbox\"]",
    ] {
        if driver
            .wait_for_visible(selector, Duration::from_millis(500))
            .await
            .is_ok()
            && driver.click_selector(selector).await.is_ok()
        {
            return Ok(());
        }
    }
    Err(anyhow!("fallback click found no element for '{}'", needle))
}

pub(crate) async fn click_by_contained_text(driver: &dyn Driver, needle: &str) -> Result<bool> {
    let script = format!(
        r#"
        (function() {{
            const needle = {needle:?}.toLowerCase();
            const all = document.querySelectorAll('*');
            for (const el of all) {{
                const rect = el.getBoundingClientRect();
                if (rect.width === 0 || rect.height === 0) continue;
                const haystacks = [
                    el.childElementCount === 0 ? (el.textContent || '') : (el.innerText || ''),
                    el.getAttribute('placeholder') || '',
                    el.value || '',
                    el.getAttribute('aria-label') || '',
                    el.getAttribute('title') || ''
                ];
                if (haystacks.some(h => String(h).toLowerCase().includes(needle))) {{
                    el.scrollIntoView({{ behavior: 'instant', block: 'center' }});
                    el.click();
                    return true;
                }}
            }}
            return false;
        }})()
        "#,
        needle = needle
    );
    let value = driver.evaluate(&script).await?;
    Ok(value.as_bool() == Some(true))
}

/// First visible plain input, then placeholder hints, then role.
async fn recover_type(
    driver: &dyn Driver,
    text: &str,
    search_context: Option<&str>,
) -> Result<()> {
    let mut selectors = vec![
        "input[type=\"text\"]".to_string(),
        "input[type=\"email\"]".to_string(),
        "input[type=\"search\"]".to_string(),
        "input:not([type])".to_string(),
        "textarea".to_string(),
        "input[placeholder*=\"email\" i]".to_string(),
        "[role=\"textbox\"]".to_string(),
    ];
    if let Some(context) = search_context {
        selectors.insert(0, format!("input[placeholder*=\"{}\" i]", context));
    }

    for selector in &selectors {
        if driver
            .wait_for_visible(selector, Duration::from_millis(500))
            .await
            .is_ok()
            && driver.fill(selector, text).await.is_ok()
        {
            return Ok(());
        }
    }
    Err(anyhow!("fallback type found no writable input"))
}

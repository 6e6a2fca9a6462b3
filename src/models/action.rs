use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The atomic unit of browser execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Action {
    Navigate {
        url: String,
    },
    Click {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fallback_selectors: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_text: Option<String>,
        #[serde(default)]
        confidence: f32,
    },
    Type {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fallback_selectors: Vec<String>,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_context: Option<String>,
    },
    Select {
        selector: String,
        value: String,
    },
    Wait {
        duration_ms: u64,
    },
    Screenshot,
}

impl Action {
    pub fn navigate(url: impl Into<String>) -> Self {
        Action::Navigate {
            url: normalize_url(&url.into()),
        }
    }

    pub fn click_text(search_text: impl Into<String>) -> Self {
        Action::Click {
            selector: None,
            fallback_selectors: Vec::new(),
            search_text: Some(search_text.into()),
            confidence: 0.0,
        }
    }

    pub fn type_into(context: impl Into<String>, text: impl Into<String>) -> Self {
        Action::Type {
            selector: None,
            fallback_selectors: Vec::new(),
            text: text.into(),
            search_context: Some(context.into()),
        }
    }

    /// Short label for events and logs. Typed text is elided so sensitive
    /// values never leak through a progress message.
    pub fn describe(&self) -> String {
        match self {
            Action::Navigate { url } => format!("navigate to {}", url),
            Action::Click {
                selector,
                search_text,
                ..
            } => match (selector, search_text) {
                (Some(sel), _) => format!("click {}", sel),
                (None, Some(text)) => format!("click \"{}\"", text),
                (None, None) => "click".to_string(),
            },
            Action::Type {
                selector,
                search_context,
                ..
            } => match (selector, search_context) {
                (Some(sel), _) => format!("type into {}", sel),
                (None, Some(ctx)) => format!("type into {} field", ctx),
                (None, None) => "type".to_string(),
            },
            Action::Select { selector, value } => format!("select {} in {}", value, selector),
            Action::Wait { duration_ms } => format!("wait {}ms", duration_ms),
            Action::Screenshot => "screenshot".to_string(),
        }
    }

    /// Failures on these steps stop the whole queue; others may be skipped.
    pub fn is_critical(&self) -> bool {
        match self {
            Action::Navigate { .. } => true,
            Action::Click {
                selector,
                search_text,
                ..
            } => {
                let hint = format!(
                    "{} {}",
                    selector.as_deref().unwrap_or(""),
                    search_text.as_deref().unwrap_or("")
                )
                .to_lowercase();
                hint.contains("login")
                    || hint.contains("log in")
                    || hint.contains("sign in")
                    || hint.contains("submit")
            }
            _ => false,
        }
    }
}

/// Prefix `https://` when the scheme is missing.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Where a queue item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOrigin {
    Single,
    MultiStep,
    GeneratedFromVariables,
    LlmParsed,
    Script,
}

/// A pending or resolved action plus its originating instruction.
///
/// `action` may be `None` at enqueue time; it is lazily parsed against the
/// current page context when popped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub origin: QueueOrigin,
    pub added_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn pending(instruction: impl Into<String>, origin: QueueOrigin) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instruction: instruction.into(),
            action: None,
            origin,
            added_at: Utc::now(),
        }
    }

    pub fn resolved(instruction: impl Into<String>, action: Action, origin: QueueOrigin) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instruction: instruction.into(),
            action: Some(action),
            origin,
            added_at: Utc::now(),
        }
    }
}

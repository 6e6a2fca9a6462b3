use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::action::Action;

/// Detected value type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    Text,
    Number,
    Email,
    Date,
    Url,
}

impl VarType {
    /// Detection order: number, email, date, url, text.
    pub fn detect(value: &str) -> Self {
        let trimmed = value.trim();
        if !trimmed.is_empty() && trimmed.parse::<f64>().is_ok() {
            VarType::Number
        } else if trimmed.contains('@') && trimmed.contains('.') {
            VarType::Email
        } else if looks_like_date(trimmed) {
            VarType::Date
        } else if trimmed.starts_with("http") || trimmed.contains("://") {
            VarType::Url
        } else {
            VarType::Text
        }
    }
}

fn looks_like_date(value: &str) -> bool {
    // digits sep digits sep digits, anywhere in the value
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let mut j = i;
            let mut groups = 1;
            loop {
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if groups == 3 {
                    return true;
                }
                if j < bytes.len() && matches!(bytes[j], b'/' | b'-' | b'.') {
                    j += 1;
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        groups += 1;
                        continue;
                    }
                }
                break;
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }
    false
}

/// A named, typed placeholder substituted into action text at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub var_type: VarType,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        let sensitive = is_sensitive_name(&name);
        Self {
            var_type: VarType::detect(&value),
            description: String::new(),
            name,
            value,
            sensitive,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Value safe for logs and user-visible events.
    pub fn display_value(&self) -> &str {
        if self.sensitive {
            "********"
        } else {
            &self.value
        }
    }
}

/// Password-like names get their values redacted everywhere user-visible.
pub fn is_sensitive_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    ["PASSWORD", "PASSWD", "SECRET", "TOKEN", "PWD", "SENHA"]
        .iter()
        .any(|marker| upper.contains(marker))
}

/// One recorded or replayed step of a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStep {
    pub instruction: String,
    pub action: Action,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_base64: Option<String>,
}

/// A persistently stored, parameterized sequence of actions.
///
/// Scripts are immutable once saved; an update is delete-then-save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl Script {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            start_url: String::new(),
            created_at: Utc::now(),
            steps: Vec::new(),
            variables: Vec::new(),
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::script::ScriptStep;

/// Queue execution state. Transitions are owned by the queue engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Idle,
    Processing,
    Paused,
    Stopped,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Processing => "processing",
            ExecutionState::Paused => "paused",
            ExecutionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Snapshot returned by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub state: ExecutionState,
    pub remaining: usize,
    pub current_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_instruction: Option<String>,
}

/// An in-progress recording. At most one is active at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_url: String,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

impl RecordingSession {
    pub fn new(name: impl Into<String>, description: impl Into<String>, start_url: String) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            start_url,
            is_active: true,
            started_at: Utc::now(),
            steps: Vec::new(),
        }
    }
}

/// Anchor used to detect out-of-band page changes from manual mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSnapshot {
    pub url: String,
    pub title: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_hash: Option<String>,
}

impl BrowserSnapshot {
    pub fn new(url: String, title: String, screenshot_hash: Option<String>) -> Self {
        Self {
            url,
            title,
            captured_at: Utc::now(),
            screenshot_hash,
        }
    }

    /// Human-readable differences against a newer snapshot.
    pub fn diff(&self, newer: &BrowserSnapshot) -> Vec<String> {
        let mut changes = Vec::new();
        if self.url != newer.url {
            changes.push(format!("URL changed: {} -> {}", self.url, newer.url));
        }
        if self.title != newer.title {
            changes.push(format!("Title changed: {} -> {}", self.title, newer.title));
        }
        if let (Some(a), Some(b)) = (&self.screenshot_hash, &newer.screenshot_hash) {
            if a != b {
                changes.push("Page content changed".to_string());
            }
        }
        changes
    }
}

//! The typed message surface between clients and the orchestrator.
//!
//! Every message is JSON with a mandatory `type` field; consumers must
//! tolerate unknown fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{BrowserSnapshot, ExecutionState, Script, Variable};

/// Client -> core messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    ChatInstruction {
        message: String,
    },
    StartRecording {
        name: String,
        #[serde(default)]
        description: String,
    },
    StopRecording,
    ExecuteScript {
        script_name: String,
        #[serde(default)]
        variables: HashMap<String, String>,
    },
    DeleteScript {
        script_name: String,
    },
    GetScriptVariables {
        script_name: String,
    },
    Navigate {
        url: String,
    },
    PauseAutomation,
    ResumeAutomation,
    ToggleManualMode,
    ManualClick {
        x: f64,
        y: f64,
    },
    SyncBrowserState,
    GetPageInfo,
    Ping,
}

/// Page summary returned for `get_page_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub url: String,
    pub title: String,
    pub captured_at: DateTime<Utc>,
}

/// Core -> client messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ChatResponse {
        message: String,
    },
    RecordingStarted {
        message: String,
    },
    RecordingStopped {
        script: Box<Script>,
        message: String,
    },
    ScriptExecutionStarted {
        message: String,
    },
    ScriptStep {
        message: String,
        step: usize,
        total: usize,
    },
    ScriptExecutionCompleted {
        message: String,
    },
    ScriptDeleted {
        script_name: String,
        message: String,
    },
    ScriptVariables {
        script_name: String,
        variables: Vec<Variable>,
    },
    ActionExecuted {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        method: Option<String>,
    },
    NavigationCompleted {
        message: String,
    },
    PageInfo {
        info: PageInfo,
    },
    Screenshot {
        data: String,
        url: String,
        timestamp: DateTime<Utc>,
        hash: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        forced: bool,
    },
    ManualModeEnabled {
        message: String,
        state: BrowserSnapshot,
    },
    ManualModeDisabled {
        message: String,
        changes: Vec<String>,
    },
    AutomationPaused {
        message: String,
    },
    AutomationResumed {
        message: String,
    },
    BrowserStateSynced {
        message: String,
        state: BrowserSnapshot,
        changes: Vec<String>,
    },
    Error {
        message: String,
    },
    Warning {
        message: String,
    },
    QueueStatus {
        state: ExecutionState,
        remaining: usize,
        current_index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_instruction: Option<String>,
    },
    StepStarted {
        index: usize,
        total: usize,
        instruction: String,
    },
    StepCompleted {
        index: usize,
        instruction: String,
    },
    StepFailed {
        index: usize,
        instruction: String,
        message: String,
    },
    QueueCompleted {
        message: String,
    },
    Pong,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        ServerEvent::Warning {
            message: message.into(),
        }
    }

    pub fn chat(message: impl Into<String>) -> Self {
        ServerEvent::ChatResponse {
            message: message.into(),
        }
    }
}

//! Shared application state: the orchestrator wiring and the client
//! message dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use chrono::Utc;

use crate::broadcast::EventBroadcaster;
use crate::browser::{CdpDriver, Driver};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::events::{ClientMessage, PageInfo, ServerEvent};
use crate::executor::{ActionExecutor, FallbackAnalytics};
use crate::llm::{GenAiModel, LanguageModel, NoopModel};
use crate::models::{Action, BrowserSnapshot, ExecutionState, QueueItem, QueueOrigin};
use crate::parser::{control, variables, InstructionParser};
use crate::queue::{rewrite_action, QueueEngine};
use crate::recording::RecordingBuffer;
use crate::screenshot::ScreenshotDiffer;
use crate::scripts::ScriptStore;

pub struct AppState {
    pub config: Config,
    pub broadcaster: EventBroadcaster,
    pub queue: QueueEngine,
    pub recording: Arc<RecordingBuffer>,
    pub scripts: ScriptStore,
    pub differ: Arc<ScreenshotDiffer>,
    pub analytics: Arc<FallbackAnalytics>,
    browser: Arc<CdpDriver>,
    driver: Arc<dyn Driver>,
    manual_mode: AtomicBool,
    /// Anchor for detecting out-of-band changes made in manual mode.
    last_snapshot: Mutex<Option<BrowserSnapshot>>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let broadcaster = EventBroadcaster::new();

        let browser = Arc::new(CdpDriver::new());
        let driver: Arc<dyn Driver> = browser.clone();

        let model: Arc<dyn LanguageModel> = match &config.llm_model {
            Some(model) => {
                tracing::info!(model = %model, "LLM assistance enabled");
                Arc::new(GenAiModel::new(model))
            }
            None => {
                tracing::info!("No LLM model configured; deterministic parsing only");
                Arc::new(NoopModel)
            }
        };

        let differ = Arc::new(ScreenshotDiffer::new(
            driver.clone(),
            broadcaster.clone(),
            config.screenshot_quality,
            config.screenshot_interval_ms,
        ));
        let _cadence = differ.spawn_cadence();

        let executor = ActionExecutor::new(
            driver.clone(),
            model.clone(),
            broadcaster.clone(),
            differ.clone(),
            config.max_retries,
        );
        let analytics = executor.analytics();

        let parser = InstructionParser::new(model);
        let recording = Arc::new(RecordingBuffer::new());

        let queue = QueueEngine::new(
            executor,
            parser,
            broadcaster.clone(),
            recording.clone(),
            driver.clone(),
            config.settle_ms,
            config.skip_failed_fill,
            config.screenshot_quality,
        );

        let scripts = ScriptStore::open_default()?;

        Ok(Self {
            config,
            broadcaster,
            queue,
            recording,
            scripts,
            differ,
            analytics,
            browser,
            driver,
            manual_mode: AtomicBool::new(false),
            last_snapshot: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ServerEvent> {
        self.broadcaster.subscribe()
    }

    async fn ensure_browser(&self) -> Result<()> {
        if self.browser.is_running().await {
            return Ok(());
        }
        self.browser
            .launch(self.config.headless)
            .await
            .map_err(|e| AppError::BrowserError(e.to_string()))
    }

    async fn snapshot(&self) -> Result<BrowserSnapshot> {
        let url = self
            .driver
            .url()
            .await
            .map_err(|e| AppError::BrowserError(e.to_string()))?;
        let title = self.driver.title().await.unwrap_or_default();
        Ok(BrowserSnapshot::new(
            url,
            title,
            self.differ.last_hash().await,
        ))
    }

    /// Dispatch one client message. Failures surface as exactly one
    /// `error` event with a human-readable message.
    pub async fn handle_client_message(&self, message: ClientMessage) {
        if let Err(e) = self.dispatch(message).await {
            self.broadcaster.publish(ServerEvent::error(e.to_string()));
        }
    }

    async fn dispatch(&self, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::ChatInstruction { message } => {
                // Control words never need the browser.
                if control::parse_control(&message).is_none() {
                    self.ensure_browser().await?;
                }
                self.queue.handle_instruction(&message).await;
                Ok(())
            }
            ClientMessage::StartRecording { name, description } => {
                self.start_recording(&name, &description).await
            }
            ClientMessage::StopRecording => self.stop_recording().await,
            ClientMessage::ExecuteScript {
                script_name,
                variables,
            } => self.execute_script(&script_name, variables).await,
            ClientMessage::DeleteScript { script_name } => {
                if !self
                    .scripts
                    .delete(&script_name)
                    .map_err(AppError::Internal)?
                {
                    return Err(AppError::ScriptNotFound(script_name));
                }
                self.broadcaster.publish(ServerEvent::ScriptDeleted {
                    message: format!("Script '{}' deleted", script_name),
                    script_name,
                });
                Ok(())
            }
            ClientMessage::GetScriptVariables { script_name } => {
                let script = self
                    .scripts
                    .load(&script_name)
                    .map_err(AppError::Internal)?
                    .ok_or(AppError::ScriptNotFound(script_name.clone()))?;
                self.broadcaster.publish(ServerEvent::ScriptVariables {
                    script_name,
                    variables: script.variables,
                });
                Ok(())
            }
            ClientMessage::Navigate { url } => {
                self.ensure_browser().await?;
                let item = QueueItem::resolved(
                    format!("Navigate to {}", url),
                    Action::navigate(url),
                    QueueOrigin::Single,
                );
                self.queue.enqueue(item).await?;
                self.queue.start();
                Ok(())
            }
            ClientMessage::PauseAutomation => {
                self.queue.pause();
                Ok(())
            }
            ClientMessage::ResumeAutomation => {
                self.queue.resume();
                Ok(())
            }
            ClientMessage::ToggleManualMode => self.toggle_manual_mode().await,
            ClientMessage::ManualClick { x, y } => self.manual_click(x, y).await,
            ClientMessage::SyncBrowserState => self.sync_browser_state().await,
            ClientMessage::GetPageInfo => {
                self.ensure_browser().await?;
                let snapshot = self.snapshot().await?;
                self.broadcaster.publish(ServerEvent::PageInfo {
                    info: PageInfo {
                        url: snapshot.url,
                        title: snapshot.title,
                        captured_at: Utc::now(),
                    },
                });
                Ok(())
            }
            ClientMessage::Ping => {
                self.broadcaster.publish(ServerEvent::Pong);
                Ok(())
            }
        }
    }

    async fn start_recording(&self, name: &str, description: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Recording needs a name".to_string(),
            ));
        }
        if self
            .scripts
            .load(name)
            .map_err(AppError::Internal)?
            .is_some()
        {
            return Err(AppError::ValidationError(format!(
                "A script named '{}' already exists",
                name
            )));
        }
        self.ensure_browser().await?;
        let start_url = self.driver.url().await.unwrap_or_default();
        self.recording.start(name, description, start_url).await?;
        self.broadcaster.publish(ServerEvent::RecordingStarted {
            message: format!("Recording '{}' started", name),
        });
        Ok(())
    }

    async fn stop_recording(&self) -> Result<()> {
        let script = self.recording.stop().await?;
        self.scripts.save(&script).map_err(AppError::Internal)?;
        self.broadcaster.publish(ServerEvent::RecordingStopped {
            message: format!(
                "Recording '{}' saved with {} steps and {} variables",
                script.name,
                script.steps.len(),
                script.variables.len()
            ),
            script: Box::new(script),
        });
        Ok(())
    }

    /// Replay a stored script with fresh bindings. Unresolved `${NAME}`
    /// tokens reject the whole replay before anything executes.
    async fn execute_script(
        &self,
        name: &str,
        bindings: std::collections::HashMap<String, String>,
    ) -> Result<()> {
        let script = self
            .scripts
            .load(name)
            .map_err(AppError::Internal)?
            .ok_or(AppError::ScriptNotFound(name.to_string()))?;

        // Declared variables provide defaults; caller bindings win.
        let mut merged = std::collections::HashMap::new();
        for var in &script.variables {
            merged.insert(var.name.clone(), var.value.clone());
        }
        merged.extend(bindings);

        let mut items = Vec::new();
        if !script.start_url.is_empty() {
            let needs_nav = !matches!(
                script.steps.first().map(|s| &s.action),
                Some(Action::Navigate { .. })
            );
            if needs_nav {
                items.push(QueueItem::resolved(
                    format!("Navigate to {}", script.start_url),
                    Action::navigate(&script.start_url),
                    QueueOrigin::Script,
                ));
            }
        }
        for step in &script.steps {
            let instruction = variables::substitute(&step.instruction, &merged)
                .map_err(unresolved_error)?;
            let action = rewrite_action(&step.action, &merged).map_err(unresolved_error)?;
            items.push(QueueItem::resolved(instruction, action, QueueOrigin::Script));
        }

        self.ensure_browser().await?;

        let vars: Vec<crate::models::Variable> = merged
            .into_iter()
            .map(|(name, value)| crate::models::Variable::new(name, value))
            .collect();
        self.queue.bind_variables(&vars).await;

        let total = items.len();
        self.queue.set_active_script(script.name.clone(), total).await;
        self.queue.enqueue_all(items).await?;
        self.broadcaster.publish(ServerEvent::ScriptExecutionStarted {
            message: format!("Executing script '{}' ({} steps)", script.name, total),
        });
        self.queue.start();
        Ok(())
    }

    /// Manual mode hands the page to the operator. Only available while
    /// the queue is idle or paused.
    async fn toggle_manual_mode(&self) -> Result<()> {
        let state = self.queue.state();
        if !matches!(state, ExecutionState::Idle | ExecutionState::Paused) {
            return Err(AppError::ValidationError(format!(
                "Manual mode requires an idle or paused queue (state: {})",
                state
            )));
        }

        if self.manual_mode.load(Ordering::SeqCst) {
            self.manual_mode.store(false, Ordering::SeqCst);
            let current = self.snapshot().await?;
            let changes = {
                let anchor = self.last_snapshot.lock().await;
                anchor
                    .as_ref()
                    .map(|a| a.diff(&current))
                    .unwrap_or_default()
            };
            self.broadcaster.publish(ServerEvent::ManualModeDisabled {
                message: "Manual mode disabled".to_string(),
                changes,
            });
        } else {
            self.ensure_browser().await?;
            self.manual_mode.store(true, Ordering::SeqCst);
            let snapshot = self.snapshot().await?;
            *self.last_snapshot.lock().await = Some(snapshot.clone());
            self.broadcaster.publish(ServerEvent::ManualModeEnabled {
                message: "Manual mode enabled; your clicks go straight to the page".to_string(),
                state: snapshot,
            });
        }
        Ok(())
    }

    async fn manual_click(&self, x: f64, y: f64) -> Result<()> {
        if !self.manual_mode.load(Ordering::SeqCst) {
            return Err(AppError::ValidationError(
                "Manual click requires manual mode".to_string(),
            ));
        }
        if !matches!(
            self.queue.state(),
            ExecutionState::Idle | ExecutionState::Paused
        ) {
            return Err(AppError::ValidationError(
                "The queue owns the browser right now".to_string(),
            ));
        }
        self.driver
            .click_at(x, y)
            .await
            .map_err(|e| AppError::BrowserError(e.to_string()))?;
        self.broadcaster.publish(ServerEvent::ActionExecuted {
            message: format!("Manual click at ({}, {})", x, y),
            method: Some("manual".to_string()),
        });
        // Manual interaction always pushes a fresh frame.
        if let Err(e) = self.differ.capture(true).await {
            tracing::debug!("Forced capture after manual click failed: {}", e);
        }
        Ok(())
    }

    async fn sync_browser_state(&self) -> Result<()> {
        self.ensure_browser().await?;
        let current = self.snapshot().await?;
        let mut anchor = self.last_snapshot.lock().await;
        let changes = anchor
            .as_ref()
            .map(|a| a.diff(&current))
            .unwrap_or_default();
        *anchor = Some(current.clone());
        self.broadcaster.publish(ServerEvent::BrowserStateSynced {
            message: if changes.is_empty() {
                "Browser state unchanged".to_string()
            } else {
                format!("Browser state synced ({} changes)", changes.len())
            },
            state: current,
            changes,
        });
        Ok(())
    }
}

fn unresolved_error(names: Vec<String>) -> AppError {
    AppError::ValidationError(format!(
        "Unresolved variables: {}",
        names.join(", ")
    ))
}

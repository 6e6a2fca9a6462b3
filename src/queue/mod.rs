//! The action queue and its state machine.
//!
//! One cooperative processing loop owns the browser cursor: it pops items,
//! lazily parses unresolved instructions against the live page, invokes the
//! executor and emits progress events. Control transitions are applied
//! between iterations, never mid-action.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;

use base64::Engine as _;

use crate::broadcast::EventBroadcaster;
use crate::browser::{stability, Driver};
use crate::error::{AppError, Result};
use crate::events::ServerEvent;
use crate::executor::{ActionExecutor, ExecutionContext};
use crate::models::{
    Action, ExecutionState, QueueItem, QueueOrigin, QueueStatus, Variable,
};
use crate::parser::{variables, ControlKind, InstructionParser, PageContext, ParseResult};
use crate::recording::RecordingBuffer;

/// Events the state machine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    Enqueue,
    Start,
    Pause,
    Resume,
    Stop,
    EmptyQueue,
    Error,
}

/// The transition table. `None` means the event is rejected in that state.
pub fn next_state(from: ExecutionState, event: QueueEvent) -> Option<ExecutionState> {
    use ExecutionState::*;
    use QueueEvent::*;
    Some(match (from, event) {
        (Idle, Start) => Processing,
        (Idle, Stop) => Stopped,
        (Idle, _) => Idle,

        (Processing, Pause) => Paused,
        (Processing, Stop) => Stopped,
        (Processing, EmptyQueue) => Idle,
        (Processing, Error) => Paused,
        (Processing, _) => Processing,

        (Paused, Resume) => Processing,
        (Paused, Stop) => Stopped,
        (Paused, _) => Paused,

        (Stopped, Enqueue) => return None,
        (Stopped, _) => Stopped,
    })
}

struct Inner {
    queue: Mutex<VecDeque<QueueItem>>,
    state: StdMutex<ExecutionState>,
    current_index: AtomicUsize,
    should_stop: AtomicBool,
    loop_running: AtomicBool,
    context: Mutex<ExecutionContext>,
    /// Set while a script replay is driving the queue: (name, total steps).
    active_script: Mutex<Option<(String, usize)>>,
    executor: ActionExecutor,
    parser: InstructionParser,
    broadcaster: EventBroadcaster,
    recording: Arc<RecordingBuffer>,
    driver: Arc<dyn Driver>,
    settle: Duration,
    skip_failed_fill: bool,
    screenshot_quality: u8,
}

#[derive(Clone)]
pub struct QueueEngine {
    inner: Arc<Inner>,
}

impl QueueEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: ActionExecutor,
        parser: InstructionParser,
        broadcaster: EventBroadcaster,
        recording: Arc<RecordingBuffer>,
        driver: Arc<dyn Driver>,
        settle_ms: u64,
        skip_failed_fill: bool,
        screenshot_quality: u8,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                state: StdMutex::new(ExecutionState::Idle),
                current_index: AtomicUsize::new(0),
                should_stop: AtomicBool::new(false),
                loop_running: AtomicBool::new(false),
                context: Mutex::new(ExecutionContext::default()),
                active_script: Mutex::new(None),
                executor,
                parser,
                broadcaster,
                recording,
                driver,
                settle: Duration::from_millis(settle_ms),
                skip_failed_fill,
                screenshot_quality,
            }),
        }
    }

    pub fn state(&self) -> ExecutionState {
        *self.inner.state.lock().expect("state lock")
    }

    fn apply(&self, event: QueueEvent) -> Option<ExecutionState> {
        let mut state = self.inner.state.lock().expect("state lock");
        let next = next_state(*state, event)?;
        *state = next;
        Some(next)
    }

    /// Append an item. Rejected while the queue is stopped.
    pub async fn enqueue(&self, item: QueueItem) -> Result<()> {
        if self.apply(QueueEvent::Enqueue).is_none() {
            return Err(AppError::QueueError(
                "Queue is stopped; clear it before adding new work".to_string(),
            ));
        }
        self.inner.queue.lock().await.push_back(item);
        Ok(())
    }

    pub async fn enqueue_all(&self, items: Vec<QueueItem>) -> Result<()> {
        for item in items {
            self.enqueue(item).await?;
        }
        Ok(())
    }

    /// Empty the queue and reset the cursor. A stopped queue becomes
    /// usable again.
    pub async fn clear(&self) {
        self.inner.queue.lock().await.clear();
        self.inner.current_index.store(0, Ordering::SeqCst);
        self.inner.should_stop.store(false, Ordering::SeqCst);
        self.inner.context.lock().await.variables.clear();
        *self.inner.active_script.lock().await = None;
        let mut state = self.inner.state.lock().expect("state lock");
        if *state == ExecutionState::Stopped {
            *state = ExecutionState::Idle;
        }
    }

    /// Enter the processing loop. A paused queue stays paused until
    /// `resume`.
    pub fn start(&self) {
        let before = self.state();
        if before == ExecutionState::Paused {
            return;
        }
        if self.apply(QueueEvent::Start) == Some(ExecutionState::Processing) {
            self.spawn_loop();
        }
    }

    pub fn pause(&self) {
        if self.apply(QueueEvent::Pause) == Some(ExecutionState::Paused) {
            self.inner
                .broadcaster
                .publish(ServerEvent::AutomationPaused {
                    message: "Automation paused".to_string(),
                });
        }
    }

    pub fn resume(&self) {
        let before = self.state();
        if self.apply(QueueEvent::Resume) == Some(ExecutionState::Processing)
            && before == ExecutionState::Paused
        {
            self.inner
                .broadcaster
                .publish(ServerEvent::AutomationResumed {
                    message: "Automation resumed".to_string(),
                });
            self.spawn_loop();
        }
    }

    /// Honored at the next loop iteration; the in-flight browser call is
    /// left to its own timeout.
    pub fn stop(&self) {
        self.inner.should_stop.store(true, Ordering::SeqCst);
        self.apply(QueueEvent::Stop);
    }

    pub async fn status(&self) -> QueueStatus {
        let queue = self.inner.queue.lock().await;
        QueueStatus {
            state: self.state(),
            remaining: queue.len(),
            current_index: self.inner.current_index.load(Ordering::SeqCst),
            next_instruction: queue.front().map(|item| item.instruction.clone()),
        }
    }

    pub async fn bind_variables(&self, vars: &[Variable]) {
        let mut ctx = self.inner.context.lock().await;
        for var in vars {
            ctx.bind(var.clone());
        }
    }

    pub async fn bindings(&self) -> HashMap<String, String> {
        self.inner.context.lock().await.bindings()
    }

    pub async fn set_active_script(&self, name: String, total: usize) {
        *self.inner.active_script.lock().await = Some((name, total));
    }

    /// Route a parsed instruction into the queue. Control words never
    /// enqueue; guidance only answers.
    pub async fn handle_instruction(&self, text: &str) {
        let context = self.page_context().await;
        let parsed = self.inner.parser.parse(text, context.as_ref()).await;

        match parsed {
            Ok(ParseResult::Control { kind }) => self.handle_control(kind).await,
            Ok(ParseResult::VariableDefinitions { variables }) => {
                self.inner
                    .broadcaster
                    .publish(ServerEvent::chat(variables::describe_definitions(&variables)));
                self.bind_variables(&variables).await;
                let steps = synthesize_variable_steps(&variables);
                if steps.is_empty() {
                    return;
                }
                for step in steps {
                    let item = QueueItem::pending(step, QueueOrigin::GeneratedFromVariables);
                    if let Err(e) = self.enqueue(item).await {
                        self.inner.broadcaster.publish(ServerEvent::error(e.to_string()));
                        return;
                    }
                }
                self.start();
            }
            Ok(ParseResult::MultiStep { steps }) => {
                // Tokens are rewritten at enqueue time; an unresolved one
                // rejects the whole batch before anything runs.
                let bindings = self.bindings().await;
                let mut resolved = Vec::with_capacity(steps.len());
                for step in &steps {
                    match variables::substitute(step, &bindings) {
                        Ok(step) => resolved.push(step),
                        Err(names) => {
                            self.inner.broadcaster.publish(ServerEvent::error(format!(
                                "Unresolved variables: {}",
                                names.join(", ")
                            )));
                            return;
                        }
                    }
                }
                let total = resolved.len();
                for step in resolved {
                    let item = QueueItem::pending(step, QueueOrigin::MultiStep);
                    if let Err(e) = self.enqueue(item).await {
                        self.inner.broadcaster.publish(ServerEvent::error(e.to_string()));
                        return;
                    }
                }
                self.inner.broadcaster.publish(ServerEvent::chat(format!(
                    "Queued {} steps",
                    total
                )));
                self.start();
            }
            Ok(ParseResult::Single { action }) => {
                let bindings = self.bindings().await;
                let action = match rewrite_action(&action, &bindings) {
                    Ok(action) => action,
                    Err(names) => {
                        self.inner.broadcaster.publish(ServerEvent::error(format!(
                            "Unresolved variables: {}",
                            names.join(", ")
                        )));
                        return;
                    }
                };
                let item = QueueItem::resolved(text, action, QueueOrigin::Single);
                match self.enqueue(item).await {
                    Ok(()) => self.start(),
                    Err(e) => self
                        .inner
                        .broadcaster
                        .publish(ServerEvent::error(e.to_string())),
                }
            }
            Ok(ParseResult::Guidance { response }) => {
                self.inner.broadcaster.publish(ServerEvent::chat(response));
            }
            Err(ambiguous) => {
                self.inner
                    .broadcaster
                    .publish(ServerEvent::error(ambiguous.to_string()));
            }
        }
    }

    async fn handle_control(&self, kind: ControlKind) {
        let broadcaster = &self.inner.broadcaster;
        match kind {
            ControlKind::Stop => {
                let was_processing = self.state() == ExecutionState::Processing;
                self.stop();
                let message = if was_processing {
                    "Stopping after the current step"
                } else {
                    "Nothing is running; queue is now stopped"
                };
                broadcaster.publish(ServerEvent::chat(message));
            }
            ControlKind::Pause => {
                if self.state() == ExecutionState::Processing {
                    self.pause();
                } else {
                    broadcaster.publish(ServerEvent::chat("Nothing is processing to pause"));
                }
            }
            ControlKind::Resume => {
                if self.state() == ExecutionState::Paused {
                    self.resume();
                } else {
                    broadcaster.publish(ServerEvent::chat("Nothing is paused to resume"));
                }
            }
            ControlKind::Clear => {
                self.clear().await;
                broadcaster.publish(ServerEvent::chat("Queue cleared"));
            }
            ControlKind::Status => {
                let status = self.status().await;
                broadcaster.publish(ServerEvent::QueueStatus {
                    state: status.state,
                    remaining: status.remaining,
                    current_index: status.current_index,
                    next_instruction: status.next_instruction,
                });
            }
        }
    }

    /// Sensitive variable values never reach user-visible events.
    async fn redacted(&self, text: &str) -> String {
        let ctx = self.inner.context.lock().await;
        let mut out = text.to_string();
        for var in ctx.variables.values().filter(|v| v.sensitive) {
            if !var.value.is_empty() {
                out = out.replace(&var.value, "********");
            }
        }
        out
    }

    async fn page_context(&self) -> Option<PageContext> {
        let url = self.inner.driver.url().await.ok()?;
        let title = self.inner.driver.title().await.unwrap_or_default();
        Some(PageContext {
            url,
            title,
            screenshot_base64: None,
        })
    }

    fn spawn_loop(&self) {
        if self.inner.loop_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_loop().await;
            engine.inner.loop_running.store(false, Ordering::SeqCst);
        });
    }

    async fn run_loop(&self) {
        let inner = &self.inner;
        loop {
            if inner.should_stop.load(Ordering::SeqCst) {
                inner.should_stop.store(false, Ordering::SeqCst);
                break;
            }
            if self.state() != ExecutionState::Processing {
                break;
            }

            let Some(mut item) = inner.queue.lock().await.pop_front() else {
                self.apply(QueueEvent::EmptyQueue);
                inner.current_index.store(0, Ordering::SeqCst);
                inner.context.lock().await.variables.clear();
                inner.broadcaster.publish(ServerEvent::QueueCompleted {
                    message: "All queued steps completed".to_string(),
                });
                if let Some((name, _)) = inner.active_script.lock().await.take() {
                    inner
                        .broadcaster
                        .publish(ServerEvent::ScriptExecutionCompleted {
                            message: format!("Script '{}' completed", name),
                        });
                }
                break;
            };

            // Lazy parse against the current page.
            if item.action.is_none() {
                let context = self.page_context().await;
                match inner.parser.parse(&item.instruction, context.as_ref()).await {
                    Ok(ParseResult::Single { action }) => item.action = Some(action),
                    Ok(ParseResult::MultiStep { steps }) => {
                        let mut queue = inner.queue.lock().await;
                        for step in steps.into_iter().rev() {
                            queue.push_front(QueueItem::pending(step, QueueOrigin::MultiStep));
                        }
                        continue;
                    }
                    Ok(_) => {
                        inner.broadcaster.publish(ServerEvent::error(format!(
                            "Queued instruction is not an action: {}",
                            item.instruction
                        )));
                        continue;
                    }
                    Err(e) => {
                        inner.broadcaster.publish(ServerEvent::error(e.to_string()));
                        continue;
                    }
                }
            }
            let action = item.action.clone().expect("resolved above");

            let index = inner.current_index.fetch_add(1, Ordering::SeqCst) + 1;
            let total = index + inner.queue.lock().await.len();
            let shown_instruction = self.redacted(&item.instruction).await;
            inner.broadcaster.publish(ServerEvent::StepStarted {
                index,
                total,
                instruction: shown_instruction.clone(),
            });

            let exec_ctx = inner.context.lock().await.clone();
            match inner.executor.execute(&action, &exec_ctx).await {
                Ok(outcome) => {
                    inner.broadcaster.publish(ServerEvent::ActionExecuted {
                        message: self.redacted(&action.describe()).await,
                        method: outcome.method,
                    });
                    if let Action::Navigate { url } = &action {
                        inner.broadcaster.publish(ServerEvent::NavigationCompleted {
                            message: format!("Navigation to {} completed", url),
                        });
                    }
                    inner.broadcaster.publish(ServerEvent::StepCompleted {
                        index,
                        instruction: shown_instruction.clone(),
                    });
                    if let Some((name, script_total)) = inner.active_script.lock().await.clone() {
                        inner.broadcaster.publish(ServerEvent::ScriptStep {
                            message: format!("Script '{}': step {} of {}", name, index, script_total),
                            step: index,
                            total: script_total,
                        });
                    }

                    self.commit_to_recording(&item, &action).await;

                    // Inter-step settle, then wait for the page to calm down.
                    tokio::time::sleep(inner.settle).await;
                    stability::wait_for_stability(inner.driver.as_ref(), stability::STABILITY_CAP)
                        .await;
                }
                Err(err) => {
                    let shown_error = self.redacted(&err.message).await;
                    inner.broadcaster.publish(ServerEvent::StepFailed {
                        index,
                        instruction: shown_instruction.clone(),
                        message: shown_error.clone(),
                    });
                    inner.broadcaster.publish(ServerEvent::error(format!(
                        "Step {} failed: {}",
                        index, shown_error
                    )));

                    let skippable = !action.is_critical()
                        && matches!(action, Action::Type { .. } | Action::Select { .. });
                    if skippable && inner.skip_failed_fill {
                        inner.broadcaster.publish(ServerEvent::warning(format!(
                            "Skipping failed fill step: {}",
                            shown_instruction
                        )));
                        continue;
                    }

                    // Auto-pause with the failed item back at the head, so
                    // `resume` re-pops it.
                    inner.queue.lock().await.push_front(item);
                    inner.current_index.fetch_sub(1, Ordering::SeqCst);
                    if self.apply(QueueEvent::Error) == Some(ExecutionState::Paused) {
                        inner.broadcaster.publish(ServerEvent::AutomationPaused {
                            message:
                                "Automation paused after a failed step; resume to retry or clear"
                                    .to_string(),
                        });
                    }
                    break;
                }
            }
        }
    }

    async fn commit_to_recording(&self, item: &QueueItem, action: &Action) {
        if !self.inner.recording.is_active().await {
            return;
        }
        let screenshot = match self
            .inner
            .driver
            .screenshot_jpeg(self.inner.screenshot_quality)
            .await
        {
            Ok(bytes) => Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            Err(_) => None,
        };
        self.inner
            .recording
            .append(&item.instruction, action, screenshot)
            .await;
    }
}

/// Canonical action sequence for a variable-definition block: navigate,
/// identifier, password, then the login click when any credential exists.
pub fn synthesize_variable_steps(variables: &[Variable]) -> Vec<String> {
    let mut steps = Vec::new();

    let url_var = variables.iter().find(|v| {
        let upper = v.name.to_uppercase();
        upper.contains("URL") || upper.contains("LINK")
    });
    if let Some(var) = url_var {
        steps.push(format!("Navigate to {}", var.value));
    }

    let is_url = |v: &&Variable| {
        let upper = v.name.to_uppercase();
        upper.contains("URL") || upper.contains("LINK")
    };
    let is_password = |v: &&Variable| v.sensitive;

    let identifier = variables
        .iter()
        .find(|v| !is_url(v) && !is_password(v));
    let mut credentials = false;

    if let Some(var) = identifier {
        let upper = var.name.to_uppercase();
        let field = if upper.contains("CPF") {
            "cpf"
        } else if upper.contains("EMAIL") {
            "email"
        } else {
            "username"
        };
        steps.push(format!("Type {} in {} field", var.value, field));
        credentials = true;
    }

    if let Some(var) = variables.iter().find(is_password) {
        steps.push(format!("Type {} in password field", var.value));
        credentials = true;
    }

    if credentials {
        steps.push("Click login button".to_string());
    }

    steps
}

/// Rewrite `${NAME}` tokens inside an action's textual fields.
/// Unresolved tokens reject the action before execution.
pub fn rewrite_action(
    action: &Action,
    bindings: &HashMap<String, String>,
) -> std::result::Result<Action, Vec<String>> {
    let sub = |text: &str| variables::substitute(text, bindings);
    Ok(match action {
        Action::Navigate { url } => Action::Navigate { url: sub(url)? },
        Action::Click {
            selector,
            fallback_selectors,
            search_text,
            confidence,
        } => Action::Click {
            selector: selector.clone(),
            fallback_selectors: fallback_selectors.clone(),
            search_text: match search_text {
                Some(text) => Some(sub(text)?),
                None => None,
            },
            confidence: *confidence,
        },
        Action::Type {
            selector,
            fallback_selectors,
            text,
            search_context,
        } => Action::Type {
            selector: selector.clone(),
            fallback_selectors: fallback_selectors.clone(),
            text: sub(text)?,
            search_context: search_context.clone(),
        },
        Action::Select { selector, value } => Action::Select {
            selector: selector.clone(),
            value: sub(value)?,
        },
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutionState::*;

    #[test]
    fn transition_table_matches_the_contract() {
        // idle
        assert_eq!(next_state(Idle, QueueEvent::Enqueue), Some(Idle));
        assert_eq!(next_state(Idle, QueueEvent::Start), Some(Processing));
        assert_eq!(next_state(Idle, QueueEvent::Pause), Some(Idle));
        assert_eq!(next_state(Idle, QueueEvent::Resume), Some(Idle));
        assert_eq!(next_state(Idle, QueueEvent::Stop), Some(Stopped));
        assert_eq!(next_state(Idle, QueueEvent::EmptyQueue), Some(Idle));
        assert_eq!(next_state(Idle, QueueEvent::Error), Some(Idle));
        // processing
        assert_eq!(next_state(Processing, QueueEvent::Enqueue), Some(Processing));
        assert_eq!(next_state(Processing, QueueEvent::Start), Some(Processing));
        assert_eq!(next_state(Processing, QueueEvent::Pause), Some(Paused));
        assert_eq!(next_state(Processing, QueueEvent::Resume), Some(Processing));
        assert_eq!(next_state(Processing, QueueEvent::Stop), Some(Stopped));
        assert_eq!(next_state(Processing, QueueEvent::EmptyQueue), Some(Idle));
        assert_eq!(next_state(Processing, QueueEvent::Error), Some(Paused));
        // paused
        assert_eq!(next_state(Paused, QueueEvent::Enqueue), Some(Paused));
        assert_eq!(next_state(Paused, QueueEvent::Start), Some(Paused));
        assert_eq!(next_state(Paused, QueueEvent::Pause), Some(Paused));
        assert_eq!(next_state(Paused, QueueEvent::Resume), Some(Processing));
        assert_eq!(next_state(Paused, QueueEvent::Stop), Some(Stopped));
        assert_eq!(next_state(Paused, QueueEvent::EmptyQueue), Some(Paused));
        assert_eq!(next_state(Paused, QueueEvent::Error), Some(Paused));
        // stopped
        assert_eq!(next_state(Stopped, QueueEvent::Enqueue), None);
        assert_eq!(next_state(Stopped, QueueEvent::Start), Some(Stopped));
        assert_eq!(next_state(Stopped, QueueEvent::Resume), Some(Stopped));
        assert_eq!(next_state(Stopped, QueueEvent::Stop), Some(Stopped));
    }

    #[test]
    fn variable_synthesis_orders_the_login_flow() {
        let vars = vec![
            Variable::new("LOGIN_URL", "https://example.test/login"),
            Variable::new("LOGIN_CPF", "381.151.977-85"),
            Variable::new("LOGIN_PASSWORD", "Akad@2025"),
        ];
        let steps = synthesize_variable_steps(&vars);
        assert_eq!(
            steps,
            vec![
                "Navigate to https://example.test/login",
                "Type 381.151.977-85 in cpf field",
                "Type Akad@2025 in password field",
                "Click login button",
            ]
        );
    }

    #[test]
    fn synthesis_skips_absent_variables() {
        let vars = vec![Variable::new("TARGET_URL", "https://a.test")];
        let steps = synthesize_variable_steps(&vars);
        assert_eq!(steps, vec!["Navigate to https://a.test"]);

        let vars = vec![Variable::new("USER_EMAIL", "a@b.test")];
        let steps = synthesize_variable_steps(&vars);
        assert_eq!(
            steps,
            vec!["Type a@b.test in email field", "Click login button"]
        );
    }

    #[test]
    fn synthesis_with_no_variables_is_empty() {
        assert!(synthesize_variable_steps(&[]).is_empty());
    }

    #[test]
    fn rewrite_action_substitutes_and_validates() {
        let mut bindings = HashMap::new();
        bindings.insert("HOST".to_string(), "a.test".to_string());

        let rewritten = rewrite_action(&Action::navigate("https://${HOST}/x"), &bindings).unwrap();
        assert_eq!(
            rewritten,
            Action::Navigate {
                url: "https://a.test/x".to_string()
            }
        );

        let err = rewrite_action(&Action::type_into("email", "${EMAIL}"), &bindings).unwrap_err();
        assert_eq!(err, vec!["EMAIL".to_string()]);
    }
}

//! Task lifecycle: create → plan → execute → finalize.
//!
//! The orchestrator is shared across tasks; everything mutable about a run
//! (context map, ledger, scheduler) lives in the per-task executor. The only
//! cross-task state is the cancellation registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agentflow_common::{AnalystPreference, ExecutionMode, Task, TaskType, WorkflowPlan};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifacts::ArtifactWriter;
use crate::config::{CancelMode, EngineConfig};
use crate::errors::{Result, WorkflowError};
use crate::executor::{ExecutorEvent, ExecutorSettings, WorkflowExecutor};
use crate::invoke::AgentInvoker;
use crate::ledger::CostLedger;
use crate::planner::TaskPlanner;
use crate::store::TaskStore;

/// A task submission.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub description: String,
    pub task_type: TaskType,
    /// Falls back to `engine.analyst`.
    pub analyst: Option<AnalystPreference>,
    /// Falls back to `engine.default_mode`.
    pub mode: Option<ExecutionMode>,
}

impl TaskRequest {
    pub fn new(description: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            description: description.into(),
            task_type,
            analyst: None,
            mode: None,
        }
    }

    pub fn with_analyst(mut self, analyst: AnalystPreference) -> Self {
        self.analyst = Some(analyst);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Final state of a run. `error` is set exactly when the task failed.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: Task,
    pub error: Option<WorkflowError>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Orchestrator {
    config: EngineConfig,
    invoker: Arc<dyn AgentInvoker>,
    store: Arc<dyn TaskStore>,
    artifacts: ArtifactWriter,
    planner: TaskPlanner,
    cancels: Mutex<HashMap<Uuid, CancellationToken>>,
    event_tx: Option<mpsc::Sender<ExecutorEvent>>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        invoker: Arc<dyn AgentInvoker>,
        store: Arc<dyn TaskStore>,
        artifacts: ArtifactWriter,
    ) -> Self {
        let planner = TaskPlanner::from_config(&config);
        Self {
            config,
            invoker,
            store,
            artifacts,
            planner,
            cancels: Mutex::new(HashMap::new()),
            event_tx: None,
        }
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<ExecutorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// The deterministic plan for a request, without invoking anything.
    pub fn draft(&self, request: &TaskRequest) -> WorkflowPlan {
        self.planner.draft(
            &request.description,
            &request.task_type,
            request.analyst.unwrap_or(self.config.engine.analyst),
            request.mode.unwrap_or(self.config.engine.default_mode),
        )
    }

    /// Create and persist a pending task with its drafted workflow. The task
    /// becomes cancellable once `run` starts.
    pub async fn create(&self, request: &TaskRequest) -> Result<Task> {
        let plan = self.draft(request);
        let mut task = Task::new(request.description.clone(), request.task_type.clone());
        task.complexity = Some(plan.complexity);
        task.workflow = Some(plan);
        self.store.save_task(&task).await?;
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            complexity = ?task.complexity,
            "task created"
        );
        Ok(task)
    }

    /// Create and run a task to a terminal state.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskOutcome> {
        let task = self.create(&request).await?;
        Ok(self.run(task).await)
    }

    /// Stop scheduling new steps for a task. Returns false when the task is
    /// not known to be running.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        let token = self.lock_cancels().get(&task_id).cloned();
        match token {
            Some(token) => {
                info!(task_id = %task_id, "cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Plan (if synthesis is enabled) and execute a created task.
    pub async fn run(&self, mut task: Task) -> TaskOutcome {
        let token = self.token_for(task.id);
        let result = self.drive(&mut task, &token).await;
        self.lock_cancels().remove(&task.id);

        let error = match result {
            Ok(()) => None,
            Err(err) => {
                if !task.is_terminal() {
                    // Infrastructure failure before the task could be finalized.
                    if let Err(e) = task.fail(err.to_string()) {
                        warn!(task_id = %task.id, "could not fail task: {}", e);
                    }
                    if let Err(e) = self.store.save_task(&task).await {
                        warn!(task_id = %task.id, "could not persist failed task: {:#}", e);
                    }
                }
                Some(err)
            }
        };
        TaskOutcome { task, error }
    }

    async fn drive(&self, task: &mut Task, token: &CancellationToken) -> Result<()> {
        task.start()?;
        self.store.save_task(task).await?;

        let mut ledger = CostLedger::new(self.config.pricing_table());

        if token.is_cancelled() {
            return self.abort(task, "cancelled before planning").await;
        }

        if self.config.engine.synthesize_plan {
            let draft = task
                .workflow
                .clone()
                .ok_or_else(|| anyhow::anyhow!("task {} has no drafted workflow", task.id))?;
            let synthesis = self
                .planner
                .synthesize(task, draft, self.invoker.as_ref(), &ledger);
            let raced = match self.config.engine.cancel_mode {
                CancelMode::Finish => Some(synthesis.await),
                CancelMode::Abandon => tokio::select! {
                    outcome = synthesis => Some(outcome),
                    _ = token.cancelled() => None,
                },
            };
            let Some(outcome) = raced else {
                return self.abort(task, "cancelled during planning").await;
            };
            let outcome = outcome?;

            let log_dir = self.artifacts.begin(task.id, outcome.agent.id, &outcome.agent.prompt)?;
            self.artifacts.finish(
                task.id,
                outcome.agent.id,
                &outcome.agent.raw_output,
                &outcome.tool_calls,
            )?;
            ledger.record(&outcome.agent);
            ledger.apply_to(task);

            match outcome.plan {
                Ok(plan) => {
                    task.workflow = Some(plan);
                    self.store.record_agent(task, &outcome.agent).await?;
                }
                Err(message) => {
                    self.store.record_agent(task, &outcome.agent).await?;
                    let err = WorkflowError::Planning {
                        agent_id: outcome.agent.id,
                        message,
                        log_dir,
                    };
                    task.fail(err.to_string())?;
                    self.store.save_task(task).await?;
                    warn!(task_id = %task.id, "task failed: {}", err);
                    return Err(err);
                }
            }

            if token.is_cancelled() {
                return self.abort(task, "cancelled during planning").await;
            }
        }

        let mut executor = WorkflowExecutor::new(
            Arc::clone(&self.invoker),
            Arc::clone(&self.store),
            self.artifacts.clone(),
            ExecutorSettings::from_config(&self.config),
        )
        .with_ledger(ledger)
        .with_cancellation(token.clone());
        if let Some(tx) = &self.event_tx {
            executor = executor.with_event_channel(tx.clone());
        }
        executor.execute(task).await
    }

    async fn abort(&self, task: &mut Task, reason: &str) -> Result<()> {
        let err = WorkflowError::TaskAborted {
            task_id: task.id,
            reason: reason.to_string(),
        };
        task.fail(err.to_string())?;
        self.store.save_task(task).await?;
        info!(task_id = %task.id, "task aborted: {}", reason);
        Err(err)
    }

    fn token_for(&self, task_id: Uuid) -> CancellationToken {
        self.lock_cancels().entry(task_id).or_default().clone()
    }

    fn lock_cancels(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        // A poisoned registry still holds valid tokens.
        self.cancels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

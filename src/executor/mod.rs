//! Workflow executor: walks a validated plan, invoking each step once its
//! dependencies have completed.
//!
//! One executor serves one task. It exclusively owns the task's context map
//! (digests keyed by role) and cost ledger. All in-flight invocations live
//! in a single `FuturesUnordered` polled by the executor loop, so every
//! state transition (agent record, ledger, context map, scheduler) happens
//! on the loop and a dependent step never builds its prompt before its
//! dependencies' records are persisted and their digests stored.
//!
//! The first failed step halts scheduling. Steps already in flight are
//! drained to a terminal state and recorded before the task is failed.
//! Store and artifact I/O errors never abandon that drain: a failed artifact
//! write is logged, and an agent record the store rejected is kept and
//! written again when the task is finalized.

mod prompt;

pub use prompt::build_prompt;

use std::collections::HashMap;
use std::sync::Arc;

use agentflow_common::{
    Agent, AgentContext, ExecutionMode, Role, Task, TaskStatus, TokenUsage, ToolCallTrace,
};
use anyhow::anyhow;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifacts::ArtifactWriter;
use crate::config::{CancelMode, EngineConfig};
use crate::context::{ContextLimits, ContextParser};
use crate::dag::StepScheduler;
use crate::errors::{Result, WorkflowError};
use crate::invoke::{AgentInvoker, InvocationRequest};
use crate::ledger::{CostLedger, LedgerTotals};
use crate::store::TaskStore;

/// Progress events for live reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorEvent {
    WavesPlanned {
        waves: Vec<Vec<Role>>,
    },
    StepStarted {
        role: Role,
        agent_id: Uuid,
    },
    StepCompleted {
        role: Role,
        agent_id: Uuid,
        cost: f64,
        totals: LedgerTotals,
    },
    StepFailed {
        role: Role,
        agent_id: Uuid,
        error: String,
    },
    Cancelled {
        mode: CancelMode,
        in_flight: Vec<Role>,
    },
    Finished {
        status: TaskStatus,
        total_cost: f64,
    },
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub model: String,
    /// 0 means no bound.
    pub max_parallel: usize,
    pub empty_output_retries: u32,
    pub cancel_mode: CancelMode,
    pub context_limits: ContextLimits,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            model: config.model(),
            max_parallel: config.engine.max_parallel,
            empty_output_retries: config.engine.empty_output_retries,
            cancel_mode: config.engine.cancel_mode,
            context_limits: config.context.limits(),
        }
    }
}

enum CallOutcome {
    Success,
    Error(String),
    Empty,
}

/// What came back from one step's invocation (all attempts).
struct StepRun {
    role: Role,
    attempts: u32,
    tokens: TokenUsage,
    reported_cost: f64,
    model: Option<String>,
    raw_output: String,
    tool_calls: Vec<ToolCallTrace>,
    outcome: CallOutcome,
}

async fn invoke_step(
    invoker: Arc<dyn AgentInvoker>,
    request: InvocationRequest,
    retries: u32,
) -> StepRun {
    let mut run = StepRun {
        role: request.role,
        attempts: 0,
        tokens: TokenUsage::default(),
        reported_cost: 0.0,
        model: None,
        raw_output: String::new(),
        tool_calls: Vec::new(),
        outcome: CallOutcome::Empty,
    };

    loop {
        run.attempts += 1;
        let response = match invoker.invoke(&request).await {
            Ok(response) => response,
            Err(e) => {
                run.outcome = CallOutcome::Error(format!("{:#}", e));
                return run;
            }
        };

        run.tokens.add(&response.tokens);
        run.reported_cost += response.cost;
        run.tool_calls.extend(response.tool_calls.iter().cloned());
        if response.model.is_some() {
            run.model = response.model.clone();
        }
        let is_success = response.is_success();
        let is_empty = response.is_empty_output();
        run.raw_output = response.raw_output;

        if !is_success {
            run.outcome = CallOutcome::Error(
                response
                    .error_message
                    .unwrap_or_else(|| "invocation reported an error".to_string()),
            );
            return run;
        }
        if !is_empty {
            run.outcome = CallOutcome::Success;
            return run;
        }
        if run.attempts > retries {
            run.outcome = CallOutcome::Empty;
            return run;
        }
        warn!(
            role = %request.role,
            agent_id = %request.agent_id,
            attempt = run.attempts,
            "empty output, retrying"
        );
    }
}

pub struct WorkflowExecutor {
    invoker: Arc<dyn AgentInvoker>,
    store: Arc<dyn TaskStore>,
    artifacts: ArtifactWriter,
    settings: ExecutorSettings,
    parser: ContextParser,
    ledger: CostLedger,
    contexts: HashMap<Role, AgentContext>,
    running: HashMap<Role, Agent>,
    /// Latest state of agents whose record the store rejected.
    unsaved: Vec<Agent>,
    cancel: CancellationToken,
    event_tx: Option<mpsc::Sender<ExecutorEvent>>,
}

impl WorkflowExecutor {
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        store: Arc<dyn TaskStore>,
        artifacts: ArtifactWriter,
        settings: ExecutorSettings,
    ) -> Self {
        let parser = ContextParser::new(settings.context_limits);
        Self {
            invoker,
            store,
            artifacts,
            settings,
            parser,
            ledger: CostLedger::default(),
            contexts: HashMap::new(),
            running: HashMap::new(),
            unsaved: Vec::new(),
            cancel: CancellationToken::new(),
            event_tx: None,
        }
    }

    /// Start from an existing ledger, e.g. one already holding the
    /// plan-synthesis agent.
    pub fn with_ledger(mut self, ledger: CostLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<ExecutorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn context(&self, role: Role) -> Option<&AgentContext> {
        self.contexts.get(&role)
    }

    /// Run `task.workflow` to completion or first fatal failure. The task
    /// ends `completed` or `failed` and is persisted either way; a failure
    /// is also returned.
    pub async fn execute(&mut self, task: &mut Task) -> Result<()> {
        let plan = task
            .workflow
            .clone()
            .ok_or_else(|| anyhow!("task {} has no workflow", task.id))?;
        if task.status == TaskStatus::Pending {
            task.start()?;
        }

        let mut scheduler = match StepScheduler::from_plan(&plan) {
            Ok(scheduler) => scheduler,
            Err(e) => return self.finish_failed(task, WorkflowError::InvalidPlan(e)).await,
        };

        let waves = scheduler.compute_waves();
        info!(
            task_id = %task.id,
            mode = %plan.mode,
            steps = plan.len(),
            waves = waves.len(),
            "executing workflow"
        );
        for (i, wave) in waves.iter().enumerate() {
            debug!(task_id = %task.id, wave = i, roles = ?wave, "wave");
        }
        self.emit(ExecutorEvent::WavesPlanned { waves }).await;

        let cancel = self.cancel.clone();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, StepRun>> = FuturesUnordered::new();
        let mut failure: Option<WorkflowError> = None;
        let mut cancelled = false;

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                scheduler.halt();
                let in_flight_roles = scheduler.running();
                info!(
                    task_id = %task.id,
                    mode = %self.settings.cancel_mode,
                    in_flight = ?in_flight_roles,
                    "cancellation observed"
                );
                self.emit(ExecutorEvent::Cancelled {
                    mode: self.settings.cancel_mode,
                    in_flight: in_flight_roles,
                })
                .await;
                if self.settings.cancel_mode == CancelMode::Abandon {
                    // Dropping the futures drops the calls; their agents stay active.
                    drop(in_flight);
                    self.running.clear();
                    break;
                }
            }

            for role in scheduler.ready_steps() {
                if self.settings.max_parallel > 0 && in_flight.len() >= self.settings.max_parallel {
                    break;
                }
                match self.launch(task, &mut scheduler, &plan.mode, role).await {
                    Ok(call) => in_flight.push(call),
                    Err(err) => {
                        scheduler.halt();
                        failure = failure.or(Some(err));
                        break;
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => None,
                run = in_flight.next() => run,
            };
            let Some(run) = next else {
                continue;
            };

            if let Ok(Some(err)) | Err(err) =
                self.settle(task, &mut scheduler, &plan.mode, run).await
            {
                scheduler.halt();
                failure = failure.or(Some(err));
            }
        }

        if let Some(err) = failure {
            return self.finish_failed(task, err).await;
        }
        if cancelled {
            let err = WorkflowError::TaskAborted {
                task_id: task.id,
                reason: format!("cancelled ({} in-flight calls)", self.settings.cancel_mode),
            };
            return self.finish_failed(task, err).await;
        }
        if !scheduler.all_success() {
            let err = WorkflowError::Other(anyhow!(
                "workflow stopped with {} of {} steps completed",
                scheduler.completed_count(),
                plan.len()
            ));
            return self.finish_failed(task, err).await;
        }

        let result = scheduler
            .completed_leaves()
            .into_iter()
            .map(|role| {
                let summary = self
                    .contexts
                    .get(&role)
                    .map(|c| c.summary.as_str())
                    .unwrap_or_default();
                format!("{}: {}", role, summary)
            })
            .collect::<Vec<_>>()
            .join("\n");

        self.ledger.apply_to(task);
        task.complete(result)?;
        self.store.save_task(task).await?;
        info!(
            task_id = %task.id,
            cost = task.total_cost,
            tokens = task.total_tokens,
            "task completed"
        );
        self.emit(ExecutorEvent::Finished {
            status: task.status,
            total_cost: task.total_cost,
        })
        .await;
        Ok(())
    }

    /// Create, persist and start the agent for `role`. A launch error fails
    /// the step; the agent record, if one was created, is left `failed`.
    async fn launch(
        &mut self,
        task: &mut Task,
        scheduler: &mut StepScheduler,
        mode: &ExecutionMode,
        role: Role,
    ) -> Result<BoxFuture<'static, StepRun>> {
        let step = scheduler
            .step(role)
            .cloned()
            .ok_or_else(|| anyhow!("role {} is not in the plan", role))?;

        let forwarded: Vec<(Role, &AgentContext)> = step
            .depends_on
            .iter()
            .filter_map(|dep| self.contexts.get(dep).map(|c| (*dep, c)))
            .collect();
        let prompt = build_prompt(&task.description, &step, &forwarded);

        let mut agent = Agent::new(task.id, role, prompt.clone());
        agent.model = Some(self.settings.model.clone());
        agent.activate()?;
        if let Err(e) = self.artifacts.begin(task.id, agent.id, &prompt) {
            warn!(task_id = %task.id, agent_id = %agent.id, role = %role, "{:#}", e);
        }

        scheduler.mark_running(role);
        sync_progress(task, scheduler, mode);
        if let Err(err) = self.persist(task, &agent).await {
            let message = err.to_string();
            agent.fail(&message, "", TokenUsage::default())?;
            scheduler.mark_failed(role, &message);
            sync_progress(task, scheduler, mode);
            self.ledger.record(&agent);
            self.ledger.apply_to(task);
            self.keep_unsaved(&agent);
            error!(
                task_id = %task.id,
                agent_id = %agent.id,
                role = %role,
                "step not started: {}",
                err
            );
            self.emit(ExecutorEvent::StepFailed {
                role,
                agent_id: agent.id,
                error: message,
            })
            .await;
            return Err(err);
        }

        info!(task_id = %task.id, agent_id = %agent.id, role = %role, "step started");
        self.emit(ExecutorEvent::StepStarted {
            role,
            agent_id: agent.id,
        })
        .await;

        let request = InvocationRequest {
            task_id: task.id,
            agent_id: agent.id,
            role,
            prompt,
            constraints: step.constraints.clone(),
            model: self.settings.model.clone(),
        };
        self.running.insert(role, agent);

        let invoker = Arc::clone(&self.invoker);
        let retries = self.settings.empty_output_retries;
        Ok(Box::pin(invoke_step(invoker, request, retries)))
    }

    /// Record the outcome of a finished step. Returns the step's failure,
    /// if it failed.
    async fn settle(
        &mut self,
        task: &mut Task,
        scheduler: &mut StepScheduler,
        mode: &ExecutionMode,
        run: StepRun,
    ) -> Result<Option<WorkflowError>> {
        let role = run.role;
        let mut agent = self
            .running
            .remove(&role)
            .ok_or_else(|| anyhow!("no running agent for role {}", role))?;
        agent.attempts = run.attempts;
        if run.model.is_some() {
            agent.model = run.model;
        }
        let log_dir = match self
            .artifacts
            .finish(task.id, agent.id, &run.raw_output, &run.tool_calls)
        {
            Ok(dir) => dir,
            Err(e) => {
                warn!(task_id = %task.id, agent_id = %agent.id, role = %role, "{:#}", e);
                self.artifacts.agent_dir(task.id, agent.id)
            }
        };

        let failure = match run.outcome {
            CallOutcome::Success => {
                let context = self.parser.extract_for(role, &run.raw_output);
                let cost = self
                    .ledger
                    .price(agent.model.as_deref(), &run.tokens, run.reported_cost);
                debug!(
                    role = %role,
                    raw = context.raw_length,
                    compressed = context.compressed_length,
                    "context extracted"
                );
                agent.complete(run.raw_output, Some(context.clone()), run.tokens, cost)?;
                self.contexts.insert(role, context);
                scheduler.mark_completed(role);
                None
            }
            CallOutcome::Error(message) => {
                agent.fail(&message, run.raw_output, run.tokens)?;
                Some(WorkflowError::AgentInvocation {
                    role,
                    agent_id: agent.id,
                    message,
                    tokens: run.tokens,
                    log_dir,
                })
            }
            CallOutcome::Empty => {
                agent.fail("empty output", run.raw_output, run.tokens)?;
                Some(WorkflowError::EmptyOutput {
                    role,
                    agent_id: agent.id,
                    attempts: run.attempts,
                    log_dir,
                })
            }
        };

        if let Some(err) = &failure {
            scheduler.mark_failed(role, &err.to_string());
        }

        self.ledger.record(&agent);
        self.ledger.apply_to(task);
        sync_progress(task, scheduler, mode);
        let persisted = self.persist(task, &agent).await;
        if persisted.is_err() {
            self.keep_unsaved(&agent);
        }

        match &failure {
            None => {
                info!(
                    task_id = %task.id,
                    agent_id = %agent.id,
                    role = %role,
                    cost = agent.cost,
                    tokens = agent.tokens.total(),
                    "step completed"
                );
                self.emit(ExecutorEvent::StepCompleted {
                    role,
                    agent_id: agent.id,
                    cost: agent.cost,
                    totals: self.ledger.totals(),
                })
                .await;
            }
            Some(err) => {
                error!(
                    task_id = %task.id,
                    agent_id = %agent.id,
                    role = %role,
                    "step failed: {}",
                    err
                );
                self.emit(ExecutorEvent::StepFailed {
                    role,
                    agent_id: agent.id,
                    error: err.to_string(),
                })
                .await;
            }
        }

        Ok(failure.or(persisted.err()))
    }

    async fn persist(&self, task: &Task, agent: &Agent) -> Result<()> {
        self.store.record_agent(task, agent).await.map_err(|e| {
            warn!(task_id = %task.id, agent_id = %agent.id, "agent record not saved: {:#}", e);
            WorkflowError::Other(e.context(format!(
                "Failed to persist {} agent {}",
                agent.role, agent.id
            )))
        })
    }

    fn keep_unsaved(&mut self, agent: &Agent) {
        self.unsaved.retain(|a| a.id != agent.id);
        self.unsaved.push(agent.clone());
    }

    /// Write again every agent record the store rejected during the run.
    async fn flush_unsaved(&mut self, task: &Task) {
        for agent in std::mem::take(&mut self.unsaved) {
            if let Err(e) = self.store.record_agent(task, &agent).await {
                error!(
                    task_id = %task.id,
                    agent_id = %agent.id,
                    role = %agent.role,
                    "agent record lost: {:#}",
                    e
                );
            }
        }
    }

    async fn finish_failed(&mut self, task: &mut Task, err: WorkflowError) -> Result<()> {
        self.ledger.apply_to(task);
        task.fail(err.to_string())?;
        self.flush_unsaved(task).await;
        self.store.save_task(task).await?;
        warn!(task_id = %task.id, cost = task.total_cost, "task failed: {}", err);
        self.emit(ExecutorEvent::Finished {
            status: task.status,
            total_cost: task.total_cost,
        })
        .await;
        Err(err)
    }

    async fn emit(&self, event: ExecutorEvent) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

/// Sequential plans track the running step index; the other modes track
/// the set of roles in flight.
fn sync_progress(task: &mut Task, scheduler: &StepScheduler, mode: &ExecutionMode) {
    let running = scheduler.running();
    match mode {
        ExecutionMode::Sequential => {
            task.current_step = running.first().and_then(|r| scheduler.position(*r));
        }
        ExecutionMode::Parallel | ExecutionMode::Graph => {
            task.active_roles = running;
        }
    }
}

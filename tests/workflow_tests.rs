//! Workflow scenarios driven through a scripted invoker.
//!
//! These exercise planning, scheduling, failure policy, cost accounting and
//! cancellation end to end, with the in-memory store standing in for
//! persistence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentflow::artifacts::ArtifactWriter;
use agentflow::config::{CancelMode, EngineConfig};
use agentflow::context::{ContextParser, MAX_CONTEXT_CHARS};
use agentflow::engine::{Orchestrator, TaskRequest};
use agentflow::invoke::{AgentInvoker, InvocationRequest, InvocationResponse};
use agentflow::store::{MemoryStore, TaskStore};
use agentflow::WorkflowError;
use agentflow_common::{
    AgentKind, AgentStatus, AnalystPreference, Complexity, ExecutionMode, Role, TaskStatus,
    TaskType, TokenUsage,
};
use async_trait::async_trait;
use tempfile::TempDir;

/// What a scripted role does when invoked.
#[derive(Clone)]
enum Reply {
    Ok(&'static str, TokenUsage),
    Fail(&'static str),
    Slow(Duration, &'static str),
}

struct ScriptedInvoker {
    replies: HashMap<Role, Reply>,
    calls: Mutex<Vec<Role>>,
}

impl ScriptedInvoker {
    fn new(replies: impl IntoIterator<Item = (Role, Reply)>) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.into_iter().collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Role> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> anyhow::Result<InvocationResponse> {
        self.calls.lock().unwrap().push(request.role);
        let reply = self
            .replies
            .get(&request.role)
            .cloned()
            .unwrap_or(Reply::Ok("## Summary\nDone.", TokenUsage::new(1_000, 200)));
        Ok(match reply {
            Reply::Ok(text, tokens) => InvocationResponse::success(text, tokens, 0.0),
            Reply::Fail(message) => {
                let mut resp = InvocationResponse::error(message);
                resp.tokens = TokenUsage::new(500, 0);
                resp
            }
            Reply::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                InvocationResponse::success(text, TokenUsage::new(1_000, 200), 0.0)
            }
        })
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    store: Arc<MemoryStore>,
    _logs: TempDir,
}

fn harness(invoker: Arc<ScriptedInvoker>, configure: impl FnOnce(&mut EngineConfig)) -> Harness {
    let mut config = EngineConfig::default();
    config.engine.model = "claude-sonnet-4".to_string();
    config.engine.synthesize_plan = false;
    configure(&mut config);

    let logs = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        config,
        invoker,
        store.clone(),
        ArtifactWriter::new(logs.path()),
    );
    Harness {
        orchestrator: Arc::new(orchestrator),
        store,
        _logs: logs,
    }
}

fn sum_completed_cost(agents: &[agentflow_common::Agent]) -> f64 {
    agents
        .iter()
        .filter(|a| a.status == AgentStatus::Completed)
        .map(|a| a.cost)
        .sum()
}

// =============================================================================
// Planning
// =============================================================================

#[test]
fn typo_fix_plans_builder_then_tester() {
    let h = harness(ScriptedInvoker::new([]), |_| {});
    let plan = h
        .orchestrator
        .draft(&TaskRequest::new("fix a typo in README", TaskType::BugFix));
    assert_eq!(plan.complexity, Complexity::Simple);
    assert_eq!(plan.roles(), vec![Role::Builder, Role::Tester]);
}

#[test]
fn distributed_cache_plans_analyst_and_planner_first() {
    let h = harness(ScriptedInvoker::new([]), |_| {});
    let plan = h.orchestrator.draft(&TaskRequest::new(
        "integrate a new distributed caching layer into the authentication microservice",
        TaskType::FeatureImplementation,
    ));
    assert_eq!(plan.complexity, Complexity::Complex);
    let roles = plan.roles();
    let pos = |r: Role| roles.iter().position(|x| *x == r).unwrap();
    for later in [Role::Builder, Role::Tester, Role::Reviewer] {
        assert!(pos(Role::Analyst) < pos(later));
        assert!(pos(Role::Planner) < pos(later));
    }
}

#[test]
fn planning_is_reproducible() {
    let h = harness(ScriptedInvoker::new([]), |_| {});
    for analyst in [AnalystPreference::Auto, AnalystPreference::Yes, AnalystPreference::No] {
        let request = TaskRequest::new(
            "Refactor the retry logic in the HTTP client",
            TaskType::Refactoring,
        )
        .with_analyst(analyst);
        assert_eq!(h.orchestrator.draft(&request), h.orchestrator.draft(&request));
    }
}

// =============================================================================
// Scheduling and failure policy
// =============================================================================

#[tokio::test]
async fn sequential_failure_at_step_i_leaves_exactly_i_agents() {
    let roles = [
        Role::Analyst,
        Role::Planner,
        Role::Builder,
        Role::Tester,
        Role::Reviewer,
    ];
    for (i, failing) in roles.iter().enumerate() {
        let invoker = ScriptedInvoker::new([(*failing, Reply::Fail("rate limited"))]);
        let h = harness(invoker.clone(), |_| {});
        let request = TaskRequest::new(
            "integrate a new distributed caching layer into the authentication microservice",
            TaskType::FeatureImplementation,
        )
        .with_mode(ExecutionMode::Sequential);

        let outcome = h.orchestrator.submit(request).await.unwrap();

        assert_eq!(outcome.task.status, TaskStatus::Failed);
        let agents = h.store.list_agents(outcome.task.id).await.unwrap();
        assert_eq!(agents.len(), i + 1, "failing {failing}");
        assert_eq!(invoker.calls(), roles[..=i].to_vec());
        assert_eq!(agents.last().unwrap().status, AgentStatus::Failed);
    }
}

#[tokio::test]
async fn builder_failure_fails_task_naming_builder() {
    let invoker = ScriptedInvoker::new([(Role::Builder, Reply::Fail("model overloaded"))]);
    let h = harness(invoker, |_| {});
    let request = TaskRequest::new("add retry to the uploader", TaskType::Refactoring)
        .with_analyst(AnalystPreference::Yes)
        .with_mode(ExecutionMode::Graph);

    let outcome = h.orchestrator.submit(request).await.unwrap();

    assert!(matches!(
        outcome.error,
        Some(WorkflowError::AgentInvocation { role: Role::Builder, .. })
    ));
    let task = &outcome.task;
    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.as_deref().unwrap();
    assert!(error.contains("builder"));
    assert!(error.contains("logs:"));

    let agents = h.store.list_agents(task.id).await.unwrap();
    assert!(agents.iter().all(|a| !matches!(a.role, Role::Tester | Role::Reviewer)));
    let builder = agents.iter().find(|a| a.role == Role::Builder).unwrap();
    assert_eq!(builder.status, AgentStatus::Failed);
    assert_eq!(builder.cost, 0.0);
    assert!((task.total_cost - sum_completed_cost(&agents)).abs() < 1e-12);
    assert!(task.total_cost > 0.0, "analyst cost stays recorded");
}

#[tokio::test]
async fn parallel_barrier_waits_for_all_and_bills_successes_only() {
    let invoker = ScriptedInvoker::new([
        (Role::Builder, Reply::Fail("crashed")),
        (Role::Reviewer, Reply::Slow(Duration::from_millis(50), "## Summary\nLooks fine.")),
    ]);
    let h = harness(invoker.clone(), |_| {});
    let request = TaskRequest::new("tidy up the config loader", TaskType::Refactoring)
        .with_analyst(AnalystPreference::Yes)
        .with_mode(ExecutionMode::Parallel);

    let outcome = h.orchestrator.submit(request).await.unwrap();

    assert_eq!(outcome.task.status, TaskStatus::Failed);
    let agents = h.store.list_agents(outcome.task.id).await.unwrap();
    assert_eq!(agents.len(), 3);
    assert!(agents.iter().all(|a| a.is_terminal()), "barrier drains every step");
    let reviewer = agents.iter().find(|a| a.role == Role::Reviewer).unwrap();
    assert_eq!(reviewer.status, AgentStatus::Completed);
    assert!((outcome.task.total_cost - sum_completed_cost(&agents)).abs() < 1e-12);
    assert!(outcome.task.total_cost > 0.0);
}

#[tokio::test]
async fn graph_runs_verification_roles_after_builder() {
    let invoker = ScriptedInvoker::new([]);
    let h = harness(invoker.clone(), |_| {});
    let request = TaskRequest::new(
        "integrate a new distributed caching layer into the authentication microservice",
        TaskType::FeatureImplementation,
    )
    .with_mode(ExecutionMode::Graph);

    let outcome = h.orchestrator.submit(request).await.unwrap();

    assert!(outcome.is_success());
    let calls = invoker.calls();
    assert_eq!(&calls[..3], &[Role::Analyst, Role::Planner, Role::Builder]);
    let mut tail = calls[3..].to_vec();
    tail.sort();
    assert_eq!(tail, vec![Role::Tester, Role::Reviewer]);

    let result = outcome.task.result.unwrap();
    assert!(result.contains("tester: Done."));
    assert!(result.contains("reviewer: Done."));
}

#[tokio::test]
async fn graph_tester_failure_drains_in_flight_reviewer() {
    let invoker = ScriptedInvoker::new([
        (Role::Tester, Reply::Fail("assertion failed in auth_cache_test")),
        (
            Role::Reviewer,
            Reply::Slow(Duration::from_millis(50), "## Summary\nReviewed."),
        ),
    ]);
    let h = harness(invoker.clone(), |_| {});
    let request = TaskRequest::new(
        "integrate a new distributed caching layer into the authentication microservice",
        TaskType::FeatureImplementation,
    )
    .with_mode(ExecutionMode::Graph);

    let outcome = h.orchestrator.submit(request).await.unwrap();

    assert!(matches!(
        outcome.error,
        Some(WorkflowError::AgentInvocation {
            role: Role::Tester,
            ..
        })
    ));
    let task = &outcome.task;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap().contains("tester"));

    let agents = h.store.list_agents(task.id).await.unwrap();
    assert_eq!(agents.len(), 5);
    assert!(agents.iter().all(|a| a.is_terminal()));
    let tester = agents.iter().find(|a| a.role == Role::Tester).unwrap();
    assert_eq!(tester.status, AgentStatus::Failed);
    assert_eq!(tester.cost, 0.0);
    let reviewer = agents.iter().find(|a| a.role == Role::Reviewer).unwrap();
    assert_eq!(reviewer.status, AgentStatus::Completed);
    assert!(reviewer.cost > 0.0);
    assert!((task.total_cost - sum_completed_cost(&agents)).abs() < 1e-12);
}

// =============================================================================
// Cost accounting
// =============================================================================

#[tokio::test]
async fn task_cost_equals_sum_of_completed_agents() {
    let invoker = ScriptedInvoker::new([
        (
            Role::Builder,
            Reply::Ok(
                "## Summary\nBuilt.",
                TokenUsage::with_cache(2_000, 500, 10_000, 1_000),
            ),
        ),
        (Role::Tester, Reply::Ok("## Summary\nTested.", TokenUsage::new(800, 100))),
    ]);
    let h = harness(invoker, |_| {});

    let outcome = h
        .orchestrator
        .submit(TaskRequest::new("fix a typo in README", TaskType::BugFix))
        .await
        .unwrap();

    let agents = h.store.list_agents(outcome.task.id).await.unwrap();
    assert!(outcome.is_success());
    assert!((outcome.task.total_cost - sum_completed_cost(&agents)).abs() < 1e-12);
    // sonnet: 2000*3 + 500*15 + 10000*0.30 + 1000*3.75 + 800*3 + 100*15 per million
    assert!((outcome.task.total_cost - 0.02415).abs() < 1e-9);
    let stored = h.store.load_task(outcome.task.id).await.unwrap().unwrap();
    assert_eq!(stored.total_cost, outcome.task.total_cost);
    assert_eq!(stored.total_tokens, 2_000 + 500 + 10_000 + 1_000 + 800 + 100);
}

// =============================================================================
// Cancellation
// =============================================================================

async fn run_and_cancel(
    cancel_mode: CancelMode,
) -> (agentflow::TaskOutcome, Vec<agentflow_common::Agent>) {
    let invoker = ScriptedInvoker::new([(
        Role::Builder,
        Reply::Slow(Duration::from_millis(200), "## Summary\nBuilt."),
    )]);
    let h = harness(invoker, |c| c.engine.cancel_mode = cancel_mode);
    let request = TaskRequest::new("fix a typo in README", TaskType::BugFix);

    let task = h.orchestrator.create(&request).await.unwrap();
    let task_id = task.id;
    let orchestrator = Arc::clone(&h.orchestrator);
    let run = tokio::spawn(async move { orchestrator.run(task).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.orchestrator.cancel(task_id));
    let outcome = run.await.unwrap();
    let agents = h.store.list_agents(task_id).await.unwrap();
    (outcome, agents)
}

#[tokio::test]
async fn cancel_with_finish_records_in_flight_step() {
    let (outcome, agents) = run_and_cancel(CancelMode::Finish).await;

    assert!(matches!(outcome.error, Some(WorkflowError::TaskAborted { .. })));
    assert_eq!(outcome.task.status, TaskStatus::Failed);
    assert_eq!(agents.len(), 1, "tester never starts");
    assert_eq!(agents[0].status, AgentStatus::Completed);
    assert_eq!(outcome.task.total_cost, agents[0].cost);
}

#[tokio::test]
async fn cancel_with_abandon_leaves_agent_active_and_unbilled() {
    let (outcome, agents) = run_and_cancel(CancelMode::Abandon).await;

    assert!(matches!(outcome.error, Some(WorkflowError::TaskAborted { .. })));
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].status, AgentStatus::Active);
    assert_eq!(outcome.task.total_cost, 0.0);
}

// =============================================================================
// Plan synthesis
// =============================================================================

#[tokio::test]
async fn empty_planning_output_fails_before_any_step() {
    let invoker = ScriptedInvoker::new([(Role::Planner, Reply::Ok("", TokenUsage::new(50, 0)))]);
    let h = harness(invoker.clone(), |c| c.engine.synthesize_plan = true);

    let outcome = h
        .orchestrator
        .submit(TaskRequest::new("fix a typo in README", TaskType::BugFix))
        .await
        .unwrap();

    assert!(matches!(outcome.error, Some(WorkflowError::Planning { .. })));
    assert_eq!(invoker.calls(), vec![Role::Planner]);
    let agents = h.store.list_agents(outcome.task.id).await.unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].kind, AgentKind::Planning);
    assert_eq!(agents[0].status, AgentStatus::Failed);
}

// =============================================================================
// Context compression
// =============================================================================

#[test]
fn context_digest_is_bounded_and_stable() {
    let parser = ContextParser::default();
    let inputs = [
        String::new(),
        "Done.".to_string(),
        concat!(
            "## Summary\nAdded caching.\n## Files\n- src/cache.rs\n- src/lib.rs\n",
            "## Findings\n- TTL is hard-coded\n",
        )
        .to_string(),
        "noise ".repeat(5_000),
        format!("Intro line\n{}\n- warning: flaky test in tests/io.rs", "- item\n".repeat(400)),
    ];
    for raw in &inputs {
        let first = parser.extract(raw);
        let digest = first.digest();
        assert!(digest.chars().count() <= raw.chars().count().min(MAX_CONTEXT_CHARS));
        assert_eq!(first.compressed_length, digest.chars().count());

        let second = parser.extract(&digest);
        assert_eq!(second.digest(), digest);
    }
}

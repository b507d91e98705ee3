//! Task planning: complexity classification, role selection and the
//! optional plan-synthesis call.
//!
//! The role list, dependency shape and scope constraints are a pure
//! function of `(description, task_type, analyst preference, mode)`, see
//! [`TaskPlanner::draft`]. Synthesis only adds per-step briefs and a plan
//! summary on top of that draft, so identical inputs always produce the
//! same workflow.

mod complexity;
mod response;
mod roles;

pub use complexity::{COMPLEX_THRESHOLD, ComplexityScore, classify, score};
pub use response::{PlanResponse, ResponseError, StepBrief, extract_json_object};
pub use roles::{base_instructions, constraints, select_roles};

use agentflow_common::{
    Agent, AnalystPreference, ExecutionMode, Role, Task, TaskType, ToolCallTrace, WorkflowPlan,
    WorkflowStep,
};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::invoke::{AgentInvoker, InvocationRequest};
use crate::ledger::CostLedger;

/// Result of a plan-synthesis call. The planning agent is always terminal:
/// completed with the refined plan, or failed with the reason in `plan`.
#[derive(Debug)]
pub struct PlanningOutcome {
    pub agent: Agent,
    pub tool_calls: Vec<ToolCallTrace>,
    pub plan: std::result::Result<WorkflowPlan, String>,
}

#[derive(Debug, Clone)]
pub struct TaskPlanner {
    model: String,
}

impl TaskPlanner {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.model())
    }

    /// Build the workflow without invoking anything.
    pub fn draft(
        &self,
        description: &str,
        task_type: &TaskType,
        analyst: AnalystPreference,
        mode: ExecutionMode,
    ) -> WorkflowPlan {
        let complexity = classify(description);
        let roles = select_roles(task_type, complexity, analyst);
        let steps = shape(&roles, mode)
            .into_iter()
            .map(|(role, deps)| WorkflowStep::new(role, constraints(role, complexity)).after(deps))
            .collect();
        WorkflowPlan::new(mode, complexity, steps)
    }

    /// Ask the model for per-step briefs on top of `draft`.
    pub async fn synthesize(
        &self,
        task: &Task,
        draft: WorkflowPlan,
        invoker: &dyn AgentInvoker,
        ledger: &CostLedger,
    ) -> Result<PlanningOutcome> {
        let prompt = planning_prompt(task, &draft);
        let mut agent = Agent::planning(task.id, prompt.clone());
        agent.model = Some(self.model.clone());
        agent.attempts = 1;
        agent.activate()?;

        let request = InvocationRequest {
            task_id: task.id,
            agent_id: agent.id,
            role: Role::Planner,
            prompt,
            constraints: String::new(),
            model: self.model.clone(),
        };

        let response = match invoker.invoke(&request).await {
            Ok(response) => response,
            Err(e) => {
                let message = format!("{:#}", e);
                agent.fail(&message, "", Default::default())?;
                return Ok(PlanningOutcome {
                    agent,
                    tool_calls: Vec::new(),
                    plan: Err(message),
                });
            }
        };

        if let Some(model) = &response.model {
            agent.model = Some(model.clone());
        }

        if !response.is_success() {
            let message = response
                .error_message
                .clone()
                .unwrap_or_else(|| "invocation reported an error".to_string());
            agent.fail(&message, response.raw_output, response.tokens)?;
            return Ok(PlanningOutcome {
                agent,
                tool_calls: response.tool_calls,
                plan: Err(message),
            });
        }

        let mut plan = draft;
        let parsed = PlanResponse::parse(&response.raw_output).and_then(|r| r.apply_to(&mut plan));
        match parsed {
            Ok(briefs) => {
                let cost = ledger.price(agent.model.as_deref(), &response.tokens, response.cost);
                agent.complete(response.raw_output, None, response.tokens, cost)?;
                info!(
                    task_id = %task.id,
                    agent_id = %agent.id,
                    briefs,
                    cost,
                    "plan synthesized"
                );
                Ok(PlanningOutcome {
                    agent,
                    tool_calls: response.tool_calls,
                    plan: Ok(plan),
                })
            }
            Err(e) => {
                warn!(task_id = %task.id, agent_id = %agent.id, "plan synthesis unusable: {}", e);
                let message = e.to_string();
                agent.fail(&message, response.raw_output, response.tokens)?;
                Ok(PlanningOutcome {
                    agent,
                    tool_calls: response.tool_calls,
                    plan: Err(message),
                })
            }
        }
    }
}

/// Dependencies of each role for the mode.
///
/// Graph plans chain the production roles (analyst, planner, builder) and
/// hang every verification role off the nearest production role before it,
/// so tester and reviewer run together after the builder.
fn shape(roles: &[Role], mode: ExecutionMode) -> Vec<(Role, Vec<Role>)> {
    let mut shaped = Vec::with_capacity(roles.len());
    let mut last_production: Option<Role> = None;

    for (i, role) in roles.iter().copied().enumerate() {
        let deps = match mode {
            ExecutionMode::Sequential => i
                .checked_sub(1)
                .map(|p| vec![roles[p]])
                .unwrap_or_default(),
            ExecutionMode::Parallel => Vec::new(),
            ExecutionMode::Graph => last_production.into_iter().collect(),
        };
        if !role.is_verification() {
            last_production = Some(role);
        }
        shaped.push((role, deps));
    }
    shaped
}

pub fn planning_prompt(task: &Task, plan: &WorkflowPlan) -> String {
    let mut steps = String::new();
    for step in &plan.steps {
        steps.push_str(&format!("- {}: {}\n", step.role, step.constraints));
    }

    format!(
        "You are planning a software task that will be carried out by specialised agents.\n\n\
         ## Task\n\
         Type: {}\n\
         Complexity: {}\n\n\
         {}\n\n\
         ## Workflow\n\
         The following roles will run, each with its scope:\n\
         {}\n\
         Write concrete instructions for each role. Respond with JSON only, matching:\n\
         {{\"summary\": \"one sentence\", \"steps\": [{{\"role\": \"<role>\", \"instructions\": \"...\"}}]}}\n\
         Only use the roles listed above.",
        task.task_type,
        plan.complexity,
        task.description.trim(),
        steps,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::InvocationResponse;
    use agentflow_common::{AgentKind, AgentStatus, Complexity, TokenUsage};
    use async_trait::async_trait;

    struct Canned(InvocationResponse);

    #[async_trait]
    impl AgentInvoker for Canned {
        async fn invoke(&self, _request: &InvocationRequest) -> anyhow::Result<InvocationResponse> {
            Ok(self.0.clone())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl AgentInvoker for Unreachable {
        async fn invoke(&self, _request: &InvocationRequest) -> anyhow::Result<InvocationResponse> {
            anyhow::bail!("connection refused")
        }
    }

    fn planner() -> TaskPlanner {
        TaskPlanner::new("sonnet")
    }

    #[test]
    fn test_scenario_typo_fix() {
        let plan = planner().draft(
            "fix a typo in README",
            &TaskType::BugFix,
            AnalystPreference::Auto,
            ExecutionMode::Sequential,
        );
        assert_eq!(plan.complexity, Complexity::Simple);
        assert_eq!(plan.roles(), vec![Role::Builder, Role::Tester]);
        assert!(!plan.contains(Role::Analyst));
        assert!(plan.step(Role::Tester).unwrap().depends_on.contains(&Role::Builder));
    }

    #[test]
    fn test_scenario_distributed_cache() {
        let plan = planner().draft(
            "integrate a new distributed caching layer into the authentication microservice",
            &TaskType::FeatureImplementation,
            AnalystPreference::Auto,
            ExecutionMode::Graph,
        );
        assert_eq!(plan.complexity, Complexity::Complex);
        assert_eq!(
            plan.roles(),
            vec![Role::Analyst, Role::Planner, Role::Builder, Role::Tester, Role::Reviewer]
        );
        let deps = |r: Role| plan.step(r).unwrap().depends_on.iter().copied().collect::<Vec<_>>();
        assert!(deps(Role::Analyst).is_empty());
        assert_eq!(deps(Role::Planner), vec![Role::Analyst]);
        assert_eq!(deps(Role::Builder), vec![Role::Planner]);
        assert_eq!(deps(Role::Tester), vec![Role::Builder]);
        assert_eq!(deps(Role::Reviewer), vec![Role::Builder]);
    }

    #[test]
    fn test_draft_is_deterministic() {
        let p = planner();
        let draft = || {
            p.draft(
                "Refactor the scheduler",
                &TaskType::Refactoring,
                AnalystPreference::Yes,
                ExecutionMode::Graph,
            )
        };
        assert_eq!(draft(), draft());
    }

    #[test]
    fn test_drafts_validate_in_every_mode() {
        let p = planner();
        for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel, ExecutionMode::Graph] {
            for task_type in [
                TaskType::FeatureImplementation,
                TaskType::BugFix,
                TaskType::Refactoring,
                TaskType::Documentation,
                TaskType::Testing,
            ] {
                let plan = p.draft(
                    "migrate the session schema to the new database",
                    &task_type,
                    AnalystPreference::Yes,
                    mode,
                );
                assert!(crate::dag::GraphBuilder::new(&plan).build().is_ok(), "{task_type} {mode}");
            }
        }
    }

    #[test]
    fn test_parallel_draft_has_no_dependencies() {
        let plan = planner().draft(
            "add a flag",
            &TaskType::Refactoring,
            AnalystPreference::Auto,
            ExecutionMode::Parallel,
        );
        assert!(plan.steps.iter().all(|s| s.depends_on.is_empty()));
    }

    #[tokio::test]
    async fn test_synthesize_applies_briefs() {
        let task = Task::new("fix a typo in README", TaskType::BugFix);
        let p = planner();
        let draft = p.draft(
            &task.description,
            &task.task_type,
            AnalystPreference::Auto,
            ExecutionMode::Sequential,
        );
        let invoker = Canned(InvocationResponse::success(
            concat!(
                r#"{"summary": "Correct the README typo", "#,
                r#""steps": [{"role": "builder", "instructions": "Fix 'teh'"}]}"#
            ),
            TokenUsage::new(1_000_000, 0),
            9.99,
        ));

        let outcome = p
            .synthesize(&task, draft, &invoker, &CostLedger::default())
            .await
            .unwrap();

        assert_eq!(outcome.agent.kind, AgentKind::Planning);
        assert_eq!(outcome.agent.status, AgentStatus::Completed);
        assert!((outcome.agent.cost - 3.0).abs() < 1e-9);
        let plan = outcome.plan.unwrap();
        assert_eq!(
            plan.step(Role::Builder).unwrap().brief.as_deref(),
            Some("Fix 'teh'")
        );
        assert_eq!(plan.roles(), vec![Role::Builder, Role::Tester]);
    }

    #[tokio::test]
    async fn test_synthesize_empty_output_fails_agent() {
        let task = Task::new("add logging", TaskType::FeatureImplementation);
        let p = planner();
        let draft = p.draft(
            &task.description,
            &task.task_type,
            AnalystPreference::Auto,
            ExecutionMode::Sequential,
        );
        let invoker = Canned(InvocationResponse::success("", TokenUsage::new(10, 0), 0.01));

        let outcome = p
            .synthesize(&task, draft, &invoker, &CostLedger::default())
            .await
            .unwrap();

        assert_eq!(outcome.agent.status, AgentStatus::Failed);
        assert_eq!(outcome.agent.cost, 0.0);
        assert_eq!(outcome.agent.tokens.input, 10);
        assert!(outcome.plan.unwrap_err().contains("empty"));
    }

    #[tokio::test]
    async fn test_synthesize_invoker_error_fails_agent() {
        let task = Task::new("add logging", TaskType::FeatureImplementation);
        let p = planner();
        let draft = p.draft(
            &task.description,
            &task.task_type,
            AnalystPreference::Auto,
            ExecutionMode::Sequential,
        );

        let outcome = p
            .synthesize(&task, draft, &Unreachable, &CostLedger::default())
            .await
            .unwrap();

        assert_eq!(outcome.agent.status, AgentStatus::Failed);
        assert!(outcome.agent.error.unwrap().contains("connection refused"));
    }
}

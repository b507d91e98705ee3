use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::AgentContext;
use crate::error::TransitionError;
use crate::role::Role;

/// Token breakdown reported for one model invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            ..Default::default()
        }
    }

    pub fn with_cache(input: u64, output: u64, cache_read: u64, cache_creation: u64) -> Self {
        Self {
            input,
            output,
            cache_read,
            cache_creation,
        }
    }

    /// All tokens billed for the call, cache traffic included.
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_read + self.cache_creation
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_creation += other.cache_creation;
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

/// One tool call made by the model during an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallTrace {
    pub tool: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Queued,
    Active,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Active)
                | (Self::Queued, Self::Failed)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Failed)
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the record belongs to the plan-synthesis call or to a workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Planning,
    #[default]
    Step,
}

/// One invocation of the model service under a role, with its result and metrics.
///
/// Records are append-only: once an agent reaches `completed` or `failed`
/// every mutating method returns a [`TransitionError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub task_id: Uuid,
    pub role: Role,
    #[serde(default)]
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub prompt: String,
    #[serde(default)]
    pub raw_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_context: Option<AgentContext>,
    #[serde(default)]
    pub tokens: TokenUsage,
    /// Billed cost in USD. Always zero for failed agents.
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Create a queued step agent.
    pub fn new(task_id: Uuid, role: Role, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            role,
            kind: AgentKind::Step,
            status: AgentStatus::Queued,
            prompt: prompt.into(),
            raw_output: String::new(),
            structured_context: None,
            tokens: TokenUsage::default(),
            cost: 0.0,
            model: None,
            attempts: 0,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Create the queued record for a plan-synthesis call.
    pub fn planning(task_id: Uuid, prompt: impl Into<String>) -> Self {
        Self {
            kind: AgentKind::Planning,
            ..Self::new(task_id, Role::Planner, prompt)
        }
    }

    fn transition(&mut self, next: AgentStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::new("agent", self.status, next));
        }
        self.status = next;
        Ok(())
    }

    pub fn activate(&mut self) -> Result<(), TransitionError> {
        self.transition(AgentStatus::Active)
    }

    /// Record a successful invocation.
    pub fn complete(
        &mut self,
        raw_output: impl Into<String>,
        context: Option<AgentContext>,
        tokens: TokenUsage,
        cost: f64,
    ) -> Result<(), TransitionError> {
        self.transition(AgentStatus::Completed)?;
        self.raw_output = raw_output.into();
        self.structured_context = context;
        self.tokens = tokens;
        self.cost = cost;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Record a failed invocation. Token metrics are kept for inspection;
    /// the agent is not billed to its task.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        raw_output: impl Into<String>,
        tokens: TokenUsage,
    ) -> Result<(), TransitionError> {
        self.transition(AgentStatus::Failed)?;
        self.error = Some(error.into());
        self.raw_output = raw_output.into();
        self.tokens = tokens;
        self.cost = 0.0;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_step(&self) -> bool {
        self.kind == AgentKind::Step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> Agent {
        Agent::new(Uuid::new_v4(), Role::Builder, "build it")
    }

    #[test]
    fn token_usage_total_and_add() {
        let mut usage = TokenUsage::with_cache(100, 50, 20, 10);
        assert_eq!(usage.total(), 180);
        usage.add(&TokenUsage::new(1, 2));
        assert_eq!(usage.input, 101);
        assert_eq!(usage.output, 52);
        assert_eq!(usage.cache_read, 20);
        assert!(!usage.is_zero());
        assert!(TokenUsage::default().is_zero());
    }

    #[test]
    fn agent_lifecycle_to_completed() {
        let mut a = agent();
        assert_eq!(a.status, AgentStatus::Queued);
        a.activate().unwrap();
        a.complete("done", None, TokenUsage::new(10, 5), 0.25).unwrap();
        assert_eq!(a.status, AgentStatus::Completed);
        assert_eq!(a.raw_output, "done");
        assert_eq!(a.cost, 0.25);
        assert!(a.completed_at.is_some());
    }

    #[test]
    fn failed_agent_keeps_tokens_but_is_not_billed() {
        let mut a = agent();
        a.activate().unwrap();
        a.fail("boom", "", TokenUsage::new(40, 0)).unwrap();
        assert_eq!(a.status, AgentStatus::Failed);
        assert_eq!(a.tokens.input, 40);
        assert_eq!(a.cost, 0.0);
        assert_eq!(a.error.as_deref(), Some("boom"));
    }

    #[test]
    fn terminal_agents_are_immutable() {
        let mut a = agent();
        a.activate().unwrap();
        a.complete("ok", None, TokenUsage::default(), 0.0).unwrap();

        assert!(a.activate().is_err());
        assert!(a.fail("late", "", TokenUsage::default()).is_err());
        assert!(a.complete("again", None, TokenUsage::default(), 1.0).is_err());
        assert_eq!(a.raw_output, "ok");
    }

    #[test]
    fn queued_agent_cannot_complete_directly() {
        let mut a = agent();
        assert!(a.complete("x", None, TokenUsage::default(), 0.0).is_err());
    }

    #[test]
    fn planning_record_uses_planner_role() {
        let a = Agent::planning(Uuid::new_v4(), "plan it");
        assert_eq!(a.role, Role::Planner);
        assert_eq!(a.kind, AgentKind::Planning);
        assert!(!a.is_step());
    }
}

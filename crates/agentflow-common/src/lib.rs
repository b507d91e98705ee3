//! Shared domain types for agentflow.
//!
//! Everything the planner, executor and persistence layer exchange lives here:
//! tasks and their status machine, agent records with token metrics, the
//! compact [`AgentContext`] digest forwarded between steps, and the
//! [`WorkflowPlan`] consumed by the executor.

mod agent;
mod context;
mod error;
mod plan;
mod role;
mod task;

pub use agent::{Agent, AgentKind, AgentStatus, TokenUsage, ToolCallTrace};
pub use context::{AgentContext, ELISION_MARKER, render_digest};
pub use error::TransitionError;
pub use plan::{WorkflowPlan, WorkflowStep};
pub use role::{AnalystPreference, Complexity, ExecutionMode, Role, TaskType};
pub use task::{Task, TaskStatus};

//! Typed error hierarchy for the workflow engine.
//!
//! Every variant that fails a task is rendered verbatim into `Task.error`,
//! so messages name the failing role and point at its log artifacts.

use std::path::PathBuf;

use agentflow_common::{Role, TokenUsage, TransitionError};
use thiserror::Error;
use uuid::Uuid;

use crate::dag::PlanError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The plan-synthesis call produced nothing usable.
    #[error("Planning failed: {message} (logs: {})", .log_dir.display())]
    Planning {
        agent_id: Uuid,
        message: String,
        log_dir: PathBuf,
    },

    /// The invocation service reported failure for a step.
    #[error("Role {role} failed (agent {agent_id}): {message} (logs: {})", .log_dir.display())]
    AgentInvocation {
        role: Role,
        agent_id: Uuid,
        message: String,
        tokens: TokenUsage,
        log_dir: PathBuf,
    },

    /// The call succeeded but returned no content.
    #[error("Role {role} returned empty output after {attempts} attempt(s) (agent {agent_id}, logs: {})", .log_dir.display())]
    EmptyOutput {
        role: Role,
        agent_id: Uuid,
        attempts: u32,
        log_dir: PathBuf,
    },

    #[error("Task {task_id} aborted: {reason}")]
    TaskAborted { task_id: Uuid, reason: String },

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Role whose agent caused the failure, if any.
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::AgentInvocation { role, .. } | Self::EmptyOutput { role, .. } => Some(*role),
            Self::Planning { .. } => Some(Role::Planner),
            _ => None,
        }
    }

    /// Agent record left in `failed` state for this error, if any.
    pub fn agent_id(&self) -> Option<Uuid> {
        match self {
            Self::Planning { agent_id, .. }
            | Self::AgentInvocation { agent_id, .. }
            | Self::EmptyOutput { agent_id, .. } => Some(*agent_id),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

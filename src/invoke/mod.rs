//! The Agent Invocation Service seam.
//!
//! The engine treats a model call as opaque: a role, a prompt and scope
//! constraints go in; raw text, token usage, a reported cost and a status
//! come out. [`ClaudeCliInvoker`] is the production adapter; tests plug in
//! scripted doubles through [`AgentInvoker`].

mod claude;

pub use claude::{ClaudeCliInvoker, parse_cli_output};

use agentflow_common::{Role, TokenUsage, ToolCallTrace};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub role: Role,
    pub prompt: String,
    pub constraints: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    #[default]
    Success,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub raw_output: String,
    pub tokens: TokenUsage,
    /// Cost reported by the service, in USD.
    pub cost: f64,
    pub status: InvocationStatus,
    pub error_message: Option<String>,
    /// Model that actually served the call, when the service reports it.
    pub model: Option<String>,
    pub tool_calls: Vec<ToolCallTrace>,
}

impl InvocationResponse {
    pub fn success(raw_output: impl Into<String>, tokens: TokenUsage, cost: f64) -> Self {
        Self {
            raw_output: raw_output.into(),
            tokens,
            cost,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Error,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == InvocationStatus::Success
    }

    /// Whether a successful call produced no usable text.
    pub fn is_empty_output(&self) -> bool {
        self.raw_output.trim().is_empty()
    }
}

/// Abstraction over one model call, for testability.
/// Real implementation: `ClaudeCliInvoker`.
///
/// `Err` means the call could not be made at all (spawn failure, timeout);
/// the engine treats it like an error response.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationResponse>;
}

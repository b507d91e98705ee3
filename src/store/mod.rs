//! Persistence seam for task and agent records.
//!
//! The engine writes after every transition: task creation, each agent
//! reaching `active` or a terminal state, and task finalization.
//! [`TaskStore::record_agent`] stores an agent together with the task's
//! updated totals in one write, so a reader never sees an agent's cost
//! without it also being reflected in `Task.total_cost`.

mod json;
mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use agentflow_common::{Agent, Task};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A task with its agents, in creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: Task,
    #[serde(default)]
    pub agents: Vec<Agent>,
}

impl TaskRecord {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            agents: Vec::new(),
        }
    }

    /// Insert or replace an agent by id, keeping creation order.
    pub fn upsert_agent(&mut self, agent: &Agent) {
        match self.agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => *existing = agent.clone(),
            None => self.agents.push(agent.clone()),
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_task(&self, task: &Task) -> Result<()>;

    /// Store `agent` and `task` (with its refreshed totals) atomically.
    async fn record_agent(&self, task: &Task, agent: &Agent) -> Result<()>;

    async fn load_task(&self, task_id: Uuid) -> Result<Option<Task>>;

    async fn list_agents(&self, task_id: Uuid) -> Result<Vec<Agent>>;

    /// All tasks, oldest first.
    async fn list_tasks(&self) -> Result<Vec<Task>>;
}

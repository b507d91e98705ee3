use std::collections::HashMap;

use agentflow_common::{Agent, Task};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{TaskRecord, TaskStore};

/// In-process store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Uuid, TaskRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.records.lock().await.get(&task_id).cloned()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn save_task(&self, task: &Task) -> Result<()> {
        let mut records = self.records.lock().await;
        records
            .entry(task.id)
            .and_modify(|r| r.task = task.clone())
            .or_insert_with(|| TaskRecord::new(task.clone()));
        Ok(())
    }

    async fn record_agent(&self, task: &Task, agent: &Agent) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(task.id)
            .or_insert_with(|| TaskRecord::new(task.clone()));
        record.task = task.clone();
        record.upsert_agent(agent);
        Ok(())
    }

    async fn load_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.records.lock().await.get(&task_id).map(|r| r.task.clone()))
    }

    async fn list_agents(&self, task_id: Uuid) -> Result<Vec<Agent>> {
        Ok(self
            .records
            .lock()
            .await
            .get(&task_id)
            .map(|r| r.agents.clone())
            .unwrap_or_default())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .records
            .lock()
            .await
            .values()
            .map(|r| r.task.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}

use std::path::{Path, PathBuf};

use agentflow_common::{Agent, Task};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{TaskRecord, TaskStore};

/// One pretty-printed JSON file per task: `<state_dir>/<task_id>.json`.
///
/// Writes go to a temporary file that is renamed over the record, so a
/// reader sees either the previous or the next state.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, task_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    pub async fn read_record(&self, task_id: Uuid) -> Result<Option<TaskRecord>> {
        read_record_at(&self.record_path(task_id)).await
    }

    async fn write_record(&self, record: &TaskRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create state directory: {}", self.dir.display()))?;

        let path = self.record_path(record.task.id);
        let tmp = path.with_extension("json.tmp");
        let content =
            serde_json::to_string_pretty(record).context("Failed to serialize task record")?;
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write task record: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace task record: {}", path.display()))?;
        Ok(())
    }
}

async fn read_record_at(path: &Path) -> Result<Option<TaskRecord>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read task record: {}", path.display()));
        }
    };
    let record = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse task record: {}", path.display()))?;
    Ok(Some(record))
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn save_task(&self, task: &Task) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .read_record(task.id)
            .await?
            .unwrap_or_else(|| TaskRecord::new(task.clone()));
        record.task = task.clone();
        self.write_record(&record).await
    }

    async fn record_agent(&self, task: &Task, agent: &Agent) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .read_record(task.id)
            .await?
            .unwrap_or_else(|| TaskRecord::new(task.clone()));
        record.task = task.clone();
        record.upsert_agent(agent);
        self.write_record(&record).await
    }

    async fn load_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.read_record(task_id).await?.map(|r| r.task))
    }

    async fn list_agents(&self, task_id: Uuid) -> Result<Vec<Agent>> {
        Ok(self
            .read_record(task_id)
            .await?
            .map(|r| r.agents)
            .unwrap_or_default())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read state directory: {}", self.dir.display())
                });
            }
        };

        let mut tasks = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to read state directory entry")?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(record) = read_record_at(&path).await?
            {
                tasks.push(record.task);
            }
        }
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}

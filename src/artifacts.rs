//! Per-agent log artifacts.
//!
//! ```text
//! <log_dir>/<task_id>/<agent_id>/prompt.txt
//! <log_dir>/<task_id>/<agent_id>/output.txt
//! <log_dir>/<task_id>/<agent_id>/tool_calls.jsonl
//! ```
//!
//! Debugging tooling reads these files directly; the names and layout are fixed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use agentflow_common::ToolCallTrace;
use anyhow::{Context, Result};
use uuid::Uuid;

pub const PROMPT_FILE: &str = "prompt.txt";
pub const OUTPUT_FILE: &str = "output.txt";
pub const TOOL_CALLS_FILE: &str = "tool_calls.jsonl";

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, task_id: Uuid) -> PathBuf {
        self.root.join(task_id.to_string())
    }

    pub fn agent_dir(&self, task_id: Uuid, agent_id: Uuid) -> PathBuf {
        self.task_dir(task_id).join(agent_id.to_string())
    }

    /// Create the agent directory with the prompt and empty output and
    /// tool-call files, so a crashed call still leaves all three artifacts.
    pub fn begin(&self, task_id: Uuid, agent_id: Uuid, prompt: &str) -> Result<PathBuf> {
        let dir = self.agent_dir(task_id, agent_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create artifact directory: {}", dir.display()))?;
        write_file(&dir.join(PROMPT_FILE), prompt.as_bytes())?;
        write_file(&dir.join(OUTPUT_FILE), b"")?;
        write_file(&dir.join(TOOL_CALLS_FILE), b"")?;
        Ok(dir)
    }

    /// Write the raw output and the tool-call trace, one JSON object per line.
    pub fn finish(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        raw_output: &str,
        tool_calls: &[ToolCallTrace],
    ) -> Result<PathBuf> {
        let dir = self.agent_dir(task_id, agent_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create artifact directory: {}", dir.display()))?;
        write_file(&dir.join(OUTPUT_FILE), raw_output.as_bytes())?;

        let mut lines = Vec::new();
        for call in tool_calls {
            serde_json::to_writer(&mut lines, call).context("Failed to serialize tool call")?;
            lines.push(b'\n');
        }
        write_file(&dir.join(TOOL_CALLS_FILE), &lines)?;
        Ok(dir)
    }
}

fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create artifact: {}", path.display()))?;
    file.write_all(content)
        .with_context(|| format!("Failed to write artifact: {}", path.display()))?;
    Ok(())
}

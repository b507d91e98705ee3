//! `AgentInvoker` backed by the Claude CLI in print mode.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use agentflow_common::{TokenUsage, ToolCallTrace};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{AgentInvoker, InvocationRequest, InvocationResponse, InvocationStatus};
use crate::config::EngineConfig;

#[derive(Debug, Default, Deserialize)]
struct CliUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

impl From<CliUsage> for TokenUsage {
    fn from(u: CliUsage) -> Self {
        TokenUsage::with_cache(
            u.input_tokens,
            u.output_tokens,
            u.cache_read_input_tokens,
            u.cache_creation_input_tokens,
        )
    }
}

/// The final `result` event of `stream-json` output (also what
/// `--output-format json` prints on its own).
#[derive(Debug, Deserialize)]
struct CliResult {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    total_cost_usd: f64,
    #[serde(default)]
    usage: Option<CliUsage>,
    #[serde(default)]
    model: Option<String>,
}

/// Turn CLI stdout into a response.
///
/// Accepts newline-delimited `stream-json` events (collecting `tool_use`
/// blocks as tool-call traces, paired with their `tool_result`), a single
/// JSON result object, or plain text, which is taken as the output with no
/// usage information.
pub fn parse_cli_output(stdout: &str) -> InvocationResponse {
    let trimmed = stdout.trim();

    if let Ok(result) = serde_json::from_str::<CliResult>(trimmed) {
        return from_result(result, Vec::new());
    }

    let mut tools = ToolCallCollector::default();
    let mut final_result = None;
    let mut saw_json = false;

    for line in trimmed.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(event) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        saw_json = true;
        match event.get("type").and_then(|t| t.as_str()) {
            Some("assistant") => tools.collect_uses(&event),
            Some("user") => tools.collect_results(&event),
            Some("result") => {
                final_result = serde_json::from_value::<CliResult>(event).ok();
            }
            _ => {}
        }
    }

    let tool_calls = tools.into_calls();
    match final_result {
        Some(result) => from_result(result, tool_calls),
        None if saw_json => InvocationResponse {
            tool_calls,
            ..InvocationResponse::error("CLI stream ended without a result event")
        },
        None => InvocationResponse::success(trimmed, TokenUsage::default(), 0.0),
    }
}

fn from_result(result: CliResult, tool_calls: Vec<ToolCallTrace>) -> InvocationResponse {
    let tokens = result.usage.map(TokenUsage::from).unwrap_or_default();
    let raw_output = result.result.unwrap_or_default();
    let is_error = result.is_error
        || result
            .subtype
            .as_deref()
            .is_some_and(|s| s.starts_with("error"));

    InvocationResponse {
        status: if is_error {
            InvocationStatus::Error
        } else {
            InvocationStatus::Success
        },
        error_message: is_error.then(|| {
            if raw_output.trim().is_empty() {
                result
                    .subtype
                    .clone()
                    .unwrap_or_else(|| "CLI reported an error".to_string())
            } else {
                raw_output.clone()
            }
        }),
        raw_output,
        tokens,
        cost: result.total_cost_usd,
        model: result.model,
        tool_calls,
    }
}

fn content_blocks(event: &serde_json::Value) -> &[serde_json::Value] {
    event
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Tool calls in stream order, keyed by `tool_use` id so results can be
/// attached when the matching `tool_result` arrives.
#[derive(Default)]
struct ToolCallCollector {
    calls: Vec<ToolCallTrace>,
    by_id: HashMap<String, usize>,
}

impl ToolCallCollector {
    fn collect_uses(&mut self, event: &serde_json::Value) {
        for block in content_blocks(event) {
            if block.get("type").and_then(|t| t.as_str()) != Some("tool_use") {
                continue;
            }
            if let Some(id) = block.get("id").and_then(|i| i.as_str()) {
                self.by_id.insert(id.to_string(), self.calls.len());
            }
            self.calls.push(ToolCallTrace {
                tool: block
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                input: block.get("input").cloned().unwrap_or_default(),
                output: None,
                timestamp: Utc::now(),
            });
        }
    }

    fn collect_results(&mut self, event: &serde_json::Value) {
        for block in content_blocks(event) {
            if block.get("type").and_then(|t| t.as_str()) != Some("tool_result") {
                continue;
            }
            let Some(index) = block
                .get("tool_use_id")
                .and_then(|i| i.as_str())
                .and_then(|id| self.by_id.get(id))
            else {
                continue;
            };
            if let Some(call) = self.calls.get_mut(*index) {
                call.output = block.get("content").map(tool_result_text);
            }
        }
    }

    fn into_calls(self) -> Vec<ToolCallTrace> {
        self.calls
    }
}

/// `tool_result` content is either a string or a list of text blocks.
fn tool_result_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Runs `<command> --print --output-format stream-json --verbose --model
/// <model> [extra args]` with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct ClaudeCliInvoker {
    command: String,
    extra_args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ClaudeCliInvoker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            extra_args: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            command: config.claude_cmd(),
            extra_args: config.invoker.extra_args.clone(),
            working_dir: None,
            timeout: config.invoker.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn build_command(&self, model: &str) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args([
            "--print",
            "--output-format",
            "stream-json",
            "--verbose",
            "--model",
            model,
        ])
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn run(&self, request: &InvocationRequest) -> Result<InvocationResponse> {
        let mut child = self
            .build_command(&request.model)
            .spawn()
            .with_context(|| format!("Failed to spawn {} process", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .context("Failed to write prompt to CLI stdin")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for CLI process")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut response = parse_cli_output(&stdout);

        if !output.status.success() && response.is_success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                role = %request.role,
                agent_id = %request.agent_id,
                code = ?output.status.code(),
                "CLI exited with failure"
            );
            response.status = InvocationStatus::Error;
            response.error_message = Some(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl AgentInvoker for ClaudeCliInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationResponse> {
        debug!(
            role = %request.role,
            agent_id = %request.agent_id,
            model = %request.model,
            "invoking CLI"
        );
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(request))
                .await
                .with_context(|| format!("CLI call exceeded time limit ({}s)", limit.as_secs()))?,
            None => self.run(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_common::Role;
    use uuid::Uuid;

    #[test]
    fn test_parse_json_result() {
        let stdout = r#"{"type":"result","subtype":"success","is_error":false,"result":"Built it.","total_cost_usd":0.0123,"usage":{"input_tokens":120,"output_tokens":40,"cache_read_input_tokens":1000,"cache_creation_input_tokens":50}}"#;
        let resp = parse_cli_output(stdout);
        assert!(resp.is_success());
        assert_eq!(resp.raw_output, "Built it.");
        assert_eq!(resp.tokens, TokenUsage::with_cache(120, 40, 1000, 50));
        assert!((resp.cost - 0.0123).abs() < 1e-9);
    }

    #[test]
    fn test_parse_error_result() {
        let stdout = r#"{"type":"result","subtype":"error_max_turns","is_error":true,"total_cost_usd":0.5}"#;
        let resp = parse_cli_output(stdout);
        assert!(!resp.is_success());
        assert_eq!(resp.error_message.as_deref(), Some("error_max_turns"));
        assert_eq!(resp.cost, 0.5);
    }

    #[test]
    fn test_parse_stream_collects_tool_calls() {
        let stdout = concat!(
            r#"{"type":"system","subtype":"init"}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Reading"},{"type":"tool_use","name":"Read","input":{"file_path":"src/lib.rs"}}]}}"#,
            "\n",
            r#"{"type":"result","subtype":"success","is_error":false,"result":"ok","usage":{"input_tokens":5,"output_tokens":1}}"#,
        );
        let resp = parse_cli_output(stdout);
        assert!(resp.is_success());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].tool, "Read");
        assert_eq!(resp.tool_calls[0].input["file_path"], "src/lib.rs");
        assert_eq!(resp.tokens.total(), 6);
    }

    #[test]
    fn test_parse_stream_pairs_tool_results() {
        let stdout = concat!(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}},{"type":"tool_use","id":"t2","name":"Read","input":{"file_path":"a.rs"}}]}}"#,
            "\n",
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t2","content":[{"type":"text","text":"fn main() {}"}]}]}}"#,
            "\n",
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"Cargo.toml\nsrc"}]}}"#,
            "\n",
            r#"{"type":"result","is_error":false,"result":"done"}"#,
        );
        let resp = parse_cli_output(stdout);
        assert_eq!(resp.tool_calls.len(), 2);
        assert_eq!(resp.tool_calls[0].tool, "Bash");
        assert_eq!(resp.tool_calls[0].output.as_deref(), Some("Cargo.toml\nsrc"));
        assert_eq!(resp.tool_calls[1].output.as_deref(), Some("fn main() {}"));
    }

    #[test]
    fn test_parse_stream_without_result_is_error() {
        let resp = parse_cli_output(r#"{"type":"system","subtype":"init"}"#);
        assert!(!resp.is_success());
    }

    #[test]
    fn test_parse_plain_text() {
        let resp = parse_cli_output("just text\n");
        assert!(resp.is_success());
        assert_eq!(resp.raw_output, "just text");
        assert!(resp.tokens.is_zero());
    }

    fn request() -> InvocationRequest {
        InvocationRequest {
            task_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            role: Role::Builder,
            prompt: "hello from stdin".to_string(),
            constraints: String::new(),
            model: "sonnet".to_string(),
        }
    }

    #[cfg(unix)]
    fn fake_cli(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-claude");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_passes_prompt_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = fake_cli(
            dir.path(),
            r#"input=$(cat); printf '{"result":"echo: %s","is_error":false,"total_cost_usd":0.01}' "$input""#,
        );
        let resp = ClaudeCliInvoker::new(cmd).invoke(&request()).await.unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.raw_output, "echo: hello from stdin");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_stream_tool_calls_reach_artifacts() {
        use crate::artifacts::{ArtifactWriter, TOOL_CALLS_FILE};

        let dir = tempfile::tempdir().unwrap();
        let cmd = fake_cli(
            dir.path(),
            r###"cat >/dev/null
case "$*" in
  *"--output-format stream-json --verbose"*) ;;
  *) echo "unexpected args: $*" >&2; exit 2 ;;
esac
cat <<'EOF'
{"type":"system","subtype":"init"}
{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_1","name":"Edit","input":{"file_path":"README.md"}}]}}
{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"edited"}]}}
{"type":"result","is_error":false,"result":"## Summary\nFixed the typo.","total_cost_usd":0.01,"usage":{"input_tokens":10,"output_tokens":2}}
EOF"###,
        );
        let req = request();
        let resp = ClaudeCliInvoker::new(cmd).invoke(&req).await.unwrap();
        assert!(resp.is_success(), "{:?}", resp.error_message);
        assert_eq!(resp.raw_output, "## Summary\nFixed the typo.");

        let writer = ArtifactWriter::new(dir.path().join("logs"));
        writer.begin(req.task_id, req.agent_id, &req.prompt).unwrap();
        let agent_dir = writer
            .finish(req.task_id, req.agent_id, &resp.raw_output, &resp.tool_calls)
            .unwrap();

        let jsonl = std::fs::read_to_string(agent_dir.join(TOOL_CALLS_FILE)).unwrap();
        let traces: Vec<ToolCallTrace> = jsonl
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].tool, "Edit");
        assert_eq!(traces[0].input["file_path"], "README.md");
        assert_eq!(traces[0].output.as_deref(), Some("edited"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_nonzero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = fake_cli(dir.path(), "cat >/dev/null; echo 'auth failed' >&2; exit 3");
        let resp = ClaudeCliInvoker::new(cmd).invoke(&request()).await.unwrap();
        assert!(!resp.is_success());
        assert!(resp.error_message.unwrap().contains("auth failed"));
    }

    #[tokio::test]
    async fn test_invoke_missing_binary_is_err() {
        let result = ClaudeCliInvoker::new("/nonexistent/agentflow-claude")
            .invoke(&request())
            .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = fake_cli(dir.path(), "sleep 5");
        let result = ClaudeCliInvoker::new(cmd)
            .with_timeout(Duration::from_millis(100))
            .invoke(&request())
            .await;
        assert!(result.unwrap_err().to_string().contains("time limit"));
    }
}

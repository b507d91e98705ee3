//! Engine configuration loaded from `.agentflow/agentflow.toml`.
//!
//! ```toml
//! [engine]
//! model = "sonnet"
//! default_mode = "sequential"
//! max_parallel = 4
//! empty_output_retries = 0
//! cancel_mode = "finish"
//! synthesize_plan = true
//! analyst = "auto"
//!
//! [context]
//! max_chars = 2000
//! max_files = 20
//! max_findings = 12
//!
//! [invoker]
//! command = "claude"
//! extra_args = ["--dangerously-skip-permissions"]
//! timeout_secs = 600
//!
//! [paths]
//! log_dir = ".agentflow/logs"
//! state_dir = ".agentflow/tasks"
//!
//! [pricing."claude-sonnet"]
//! input = 3.0
//! output = 15.0
//! cache_read = 0.30
//! cache_write = 3.75
//! ```
//!
//! Every section is optional. `CLAUDE_CMD` and `AGENTFLOW_MODEL` override
//! the file when set.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use agentflow_common::{AnalystPreference, ExecutionMode};

use crate::context::ContextLimits;
use crate::ledger::{ModelPricing, PricingTable};

pub const CONFIG_DIR: &str = ".agentflow";
pub const CONFIG_FILE: &str = "agentflow.toml";

/// What happens to in-flight invocations when a task is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelMode {
    /// Let running calls return and record their outcome.
    #[default]
    Finish,
    /// Drop running calls; their agents stay `active` and are never billed.
    Abandon,
}

impl std::fmt::Display for CancelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelMode::Finish => write!(f, "finish"),
            CancelMode::Abandon => write!(f, "abandon"),
        }
    }
}

impl std::str::FromStr for CancelMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "finish" => Ok(CancelMode::Finish),
            "abandon" => Ok(CancelMode::Abandon),
            _ => anyhow::bail!("Invalid cancel mode '{}'. Valid values: finish, abandon", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Model identifier passed to the invoker and used for pricing.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub default_mode: ExecutionMode,
    /// Upper bound on concurrently running steps. 0 means unbounded.
    #[serde(default)]
    pub max_parallel: usize,
    /// Extra attempts after a call returns empty output.
    #[serde(default)]
    pub empty_output_retries: u32,
    #[serde(default)]
    pub cancel_mode: CancelMode,
    /// Ask the model for per-step briefs before executing.
    #[serde(default = "default_true")]
    pub synthesize_plan: bool,
    #[serde(default)]
    pub analyst: AnalystPreference,
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            default_mode: ExecutionMode::default(),
            max_parallel: 0,
            empty_output_retries: 0,
            cancel_mode: CancelMode::default(),
            synthesize_plan: true,
            analyst: AnalystPreference::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_findings")]
    pub max_findings: usize,
}

fn default_max_chars() -> usize {
    crate::context::MAX_CONTEXT_CHARS
}

fn default_max_files() -> usize {
    crate::context::MAX_FILES
}

fn default_max_findings() -> usize {
    crate::context::MAX_FINDINGS
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            max_files: default_max_files(),
            max_findings: default_max_findings(),
        }
    }
}

impl ContextSection {
    pub fn limits(&self) -> ContextLimits {
        ContextLimits {
            max_chars: self.max_chars,
            max_files: self.max_files,
            max_findings: self.max_findings,
            ..ContextLimits::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokerSection {
    /// Model CLI command (default: "claude")
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Kill the CLI after this many seconds. Unset means no timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("logs")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("tasks")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            state_dir: default_state_dir(),
        }
    }
}

/// The complete agentflow.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub invoker: InvokerSection,
    #[serde(default)]
    pub paths: PathsSection,
    /// Per-model prices merged over the built-in table.
    #[serde(default)]
    pub pricing: BTreeMap<String, ModelPricing>,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse agentflow.toml")
    }

    /// Load `<config_dir>/agentflow.toml`, or defaults if it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize agentflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Model id (env → file → default).
    pub fn model(&self) -> String {
        std::env::var("AGENTFLOW_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.engine.model.clone())
    }

    /// Invoker command (env → file → "claude").
    pub fn claude_cmd(&self) -> String {
        std::env::var("CLAUDE_CMD")
            .ok()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| self.invoker.command.clone())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// Built-in prices with `[pricing]` entries layered on top.
    pub fn pricing_table(&self) -> PricingTable {
        let mut table = PricingTable::default();
        for (model, pricing) in &self.pricing {
            table.insert(model.clone(), *pricing);
        }
        table
    }

    /// Resolve configured paths against the project directory.
    pub fn log_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.paths.log_dir)
    }

    pub fn state_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.paths.state_dir)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let model = self.model();
        if self.pricing_table().lookup(&model).is_none() {
            warnings.push(format!(
                "No pricing entry for model '{}': costs reported by the invoker will be used",
                model
            ));
        }

        if self.context.max_chars < 200 {
            warnings.push(format!(
                "context.max_chars = {} is very small; forwarded digests will be mostly truncated",
                self.context.max_chars
            ));
        }

        if self.engine.empty_output_retries > 3 {
            warnings.push(format!(
                "engine.empty_output_retries = {} will multiply cost on persistent empty output",
                self.engine.empty_output_retries
            ));
        }

        for (model, pricing) in &self.pricing {
            if pricing.input < 0.0
                || pricing.output < 0.0
                || pricing.cache_read < 0.0
                || pricing.cache_write < 0.0
            {
                warnings.push(format!("Negative price in [pricing.\"{}\"]", model));
            }
        }

        if self.invoker.timeout_secs == Some(0) {
            warnings.push("invoker.timeout_secs = 0 disables every call".to_string());
        }

        warnings
    }
}

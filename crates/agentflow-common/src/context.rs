use serde::{Deserialize, Serialize};

use crate::role::Role;

/// Joins the head and tail excerpts of a truncated output.
pub const ELISION_MARKER: &str = "\n[...]\n";

/// Compact structured digest of one agent's output, forwarded to dependent
/// steps in place of the raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContext {
    pub role: Option<Role>,
    pub summary: String,
    #[serde(default)]
    pub file_manifest: Vec<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    /// Character count of the output this digest was built from.
    pub raw_length: usize,
    /// Character count of [`AgentContext::digest`].
    pub compressed_length: usize,
}

impl AgentContext {
    /// Render the digest text that is forwarded to dependent prompts.
    ///
    /// A digest that carries only a summary renders as the bare summary;
    /// anything richer uses the sectioned form:
    ///
    /// ```text
    /// ## Summary
    /// <summary>
    /// ## Files
    /// - <path>
    /// ## Findings
    /// - <finding>
    /// ```
    pub fn digest(&self) -> String {
        render_digest(&self.summary, &self.file_manifest, &self.key_findings)
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.file_manifest.is_empty() && self.key_findings.is_empty()
    }

    /// Fraction of the raw output removed by compression (0.0 when nothing was removed).
    pub fn compression_ratio(&self) -> f32 {
        if self.raw_length == 0 {
            return 0.0;
        }
        1.0 - (self.compressed_length as f32 / self.raw_length as f32)
    }
}

/// Render a digest from its parts; shared with the parser so that length
/// budgeting and the final record always agree.
pub fn render_digest(summary: &str, files: &[String], findings: &[String]) -> String {
    if files.is_empty() && findings.is_empty() {
        return summary.to_string();
    }

    let mut sections = Vec::new();
    if !summary.is_empty() {
        sections.push(format!("## Summary\n{}", summary));
    }
    if !files.is_empty() {
        let lines: Vec<String> = files.iter().map(|f| format!("- {}", f)).collect();
        sections.push(format!("## Files\n{}", lines.join("\n")));
    }
    if !findings.is_empty() {
        let lines: Vec<String> = findings.iter().map(|f| format!("- {}", f)).collect();
        sections.push(format!("## Findings\n{}", lines.join("\n")));
    }
    sections.join("\n")
}

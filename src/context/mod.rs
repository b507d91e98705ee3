//! Context compression between workflow steps.
//!
//! Dependent steps never see a predecessor's raw output. The executor runs
//! [`ContextParser::extract`] on every completed step and forwards only the
//! resulting [`AgentContext`](agentflow_common::AgentContext) digest, whose
//! length is bounded by [`ContextLimits::max_chars`] regardless of how much
//! the predecessor produced.

mod parser;

pub use parser::ContextParser;

/// Ceiling on a digest's length, in characters.
pub const MAX_CONTEXT_CHARS: usize = 2000;
pub const MAX_SUMMARY_CHARS: usize = 600;
pub const MAX_FILES: usize = 20;
pub const MAX_FINDINGS: usize = 12;
pub const MAX_FINDING_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub max_chars: usize,
    pub max_summary_chars: usize,
    pub max_files: usize,
    pub max_findings: usize,
    pub max_finding_chars: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_chars: MAX_CONTEXT_CHARS,
            max_summary_chars: MAX_SUMMARY_CHARS,
            max_files: MAX_FILES,
            max_findings: MAX_FINDINGS,
            max_finding_chars: MAX_FINDING_CHARS,
        }
    }
}

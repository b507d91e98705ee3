//! Parsing of the plan-synthesis response.
//!
//! The model is asked for
//! `{"summary": "...", "steps": [{"role": "builder", "instructions": "..."}]}`
//! but often wraps it in prose or a code fence, so the first balanced JSON
//! object is extracted before deserializing.

use agentflow_common::{Role, WorkflowPlan};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("planner returned empty output")]
    Empty,
    #[error("no JSON object found in planner output")]
    NoJson,
    #[error("planner output is not a valid plan: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("planner output names none of the planned roles")]
    NoUsableSteps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepBrief {
    pub role: String,
    #[serde(default)]
    pub instructions: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResponse {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepBrief>,
}

impl PlanResponse {
    pub fn parse(raw: &str) -> Result<Self, ResponseError> {
        if raw.trim().is_empty() {
            return Err(ResponseError::Empty);
        }
        let json = extract_json_object(raw).ok_or(ResponseError::NoJson)?;
        Ok(serde_json::from_str(json)?)
    }

    /// Attach briefs to the matching steps of `plan`. Steps naming a role
    /// the plan does not contain are dropped with a warning. Returns how
    /// many steps received a brief.
    pub fn apply_to(self, plan: &mut WorkflowPlan) -> Result<usize, ResponseError> {
        let mut applied = 0;
        for brief in self.steps {
            let role = match brief.role.parse::<Role>() {
                Ok(role) => role,
                Err(e) => {
                    warn!(role = %brief.role, "ignoring planner step: {}", e);
                    continue;
                }
            };
            let Some(step) = plan.step_mut(role) else {
                warn!(role = %role, "ignoring planner step for role outside the workflow");
                continue;
            };
            let instructions = brief.instructions.trim();
            if instructions.is_empty() {
                continue;
            }
            step.brief = Some(instructions.to_string());
            applied += 1;
        }

        if applied == 0 {
            return Err(ResponseError::NoUsableSteps);
        }
        plan.summary = self
            .summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(applied)
    }
}

/// Find the first balanced `{...}` in `text`, ignoring braces inside JSON
/// string literals.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

//! Prompt assembly for workflow steps.

use agentflow_common::{AgentContext, Role, WorkflowStep};

use crate::planner::base_instructions;

const OUTPUT_CONVENTION: &str = "Finish your response with these sections:\n\
     ## Summary\n\
     One or two sentences on what you did or found.\n\
     ## Files\n\
     - one path per line for every file you created or changed\n\
     ## Findings\n\
     - one line per issue, risk or follow-up worth passing on";

/// Build the prompt for one step from the role's base instructions, the
/// task description, the digests of the roles it depends on and its scope.
pub fn build_prompt(
    description: &str,
    step: &WorkflowStep,
    forwarded: &[(Role, &AgentContext)],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(base_instructions(step.role));
    prompt.push_str("\n\n## Task\n");
    prompt.push_str(description.trim());
    prompt.push('\n');

    if let Some(brief) = &step.brief {
        prompt.push_str("\n## Instructions\n");
        prompt.push_str(brief);
        prompt.push('\n');
    }

    for (role, context) in forwarded {
        if context.is_empty() {
            continue;
        }
        prompt.push_str(&format!("\n## Context from {}\n", role));
        prompt.push_str(&context.digest());
        prompt.push('\n');
    }

    if !step.constraints.is_empty() {
        prompt.push_str("\n## Scope\n");
        prompt.push_str(&step.constraints);
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(OUTPUT_CONVENTION);
    prompt.push('\n');
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextParser;

    #[test]
    fn test_prompt_sections_in_order() {
        let constraints = "Minimal test set: the happy path plus one edge case.";
        let step = WorkflowStep::new(Role::Tester, constraints)
            .after([Role::Builder])
            .with_brief("Cover the new flag");
        let ctx = ContextParser::default().extract_for(
            Role::Builder,
            "## Summary\nAdded --dry-run.\n## Files\n- src/main.rs\n",
        );

        let prompt = build_prompt("Add a dry-run flag", &step, &[(Role::Builder, &ctx)]);

        let task = prompt.find("## Task").unwrap();
        let brief = prompt.find("## Instructions").unwrap();
        let context = prompt.find("## Context from builder").unwrap();
        let scope = prompt.find("## Scope").unwrap();
        assert!(prompt.starts_with("You are the tester."));
        assert!(task < brief && brief < context && context < scope);
        assert!(prompt.contains("src/main.rs"));
        assert!(prompt.contains("happy path plus one edge case"));
    }

    #[test]
    fn test_empty_context_is_not_forwarded() {
        let step = WorkflowStep::new(Role::Reviewer, "");
        let empty = ContextParser::default().extract("");
        let prompt = build_prompt("Review", &step, &[(Role::Builder, &empty)]);
        assert!(!prompt.contains("## Context from"));
        assert!(!prompt.contains("## Scope"));
    }
}

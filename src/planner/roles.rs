//! Role policy: which roles a task gets, and what each is told.

use agentflow_common::{AnalystPreference, Complexity, Role, TaskType};

/// Roles for a task type at a complexity, analyst excluded.
fn table_row(task_type: &TaskType, complexity: Complexity) -> &'static [Role] {
    use Role::*;
    match (task_type, complexity) {
        (TaskType::BugFix, Complexity::Simple) => &[Builder, Tester],
        (TaskType::BugFix, Complexity::Complex) => &[Planner, Builder, Tester],
        (TaskType::Refactoring, Complexity::Simple) => &[Builder, Reviewer],
        (TaskType::Refactoring, Complexity::Complex) => &[Planner, Builder, Tester, Reviewer],
        (TaskType::Documentation | TaskType::Testing, Complexity::Simple) => &[Builder],
        (TaskType::Documentation | TaskType::Testing, Complexity::Complex) => {
            &[Planner, Builder, Reviewer]
        }
        (TaskType::FeatureImplementation | TaskType::Custom(_), Complexity::Simple) => {
            &[Builder, Tester]
        }
        (TaskType::FeatureImplementation | TaskType::Custom(_), Complexity::Complex) => {
            &[Planner, Builder, Tester, Reviewer]
        }
    }
}

/// Whether the policy table itself calls for an analyst.
fn table_wants_analyst(task_type: &TaskType, complexity: Complexity) -> bool {
    matches!(
        task_type,
        TaskType::FeatureImplementation | TaskType::Custom(_)
    ) && complexity == Complexity::Complex
}

/// Ordered role list for a task.
///
/// `Yes` puts the analyst first for any task type, `No` never includes it,
/// and `Auto` follows the table.
pub fn select_roles(
    task_type: &TaskType,
    complexity: Complexity,
    analyst: AnalystPreference,
) -> Vec<Role> {
    let include_analyst = match analyst {
        AnalystPreference::Yes => true,
        AnalystPreference::No => false,
        AnalystPreference::Auto => table_wants_analyst(task_type, complexity),
    };

    let mut roles = Vec::with_capacity(5);
    if include_analyst {
        roles.push(Role::Analyst);
    }
    roles.extend_from_slice(table_row(task_type, complexity));
    roles
}

/// Standing instructions for a role, independent of the task.
pub fn base_instructions(role: Role) -> &'static str {
    match role {
        Role::Analyst => {
            "You are the analyst. Investigate the codebase and the request. Identify the \
             components involved, the risks, and any open questions. Do not change code."
        }
        Role::Planner => {
            "You are the planner. Produce a concrete, ordered implementation plan: the files \
             to touch, the changes in each, and how the result will be verified. Do not change code."
        }
        Role::Builder => {
            "You are the builder. Implement the requested change. Keep edits focused on the task \
             and leave the tree in a state where the project builds."
        }
        Role::Tester => {
            "You are the tester. Write or update tests for the change and run them. Report \
             failures precisely, with the failing test names."
        }
        Role::Reviewer => {
            "You are the reviewer. Review the change for correctness, clarity and consistency \
             with the surrounding code. Report problems as findings; do not rewrite the change."
        }
    }
}

/// Scope directive for a role at a complexity.
pub fn constraints(role: Role, complexity: Complexity) -> &'static str {
    match (role, complexity) {
        (Role::Analyst, Complexity::Simple) => {
            "Keep the analysis brief: the affected area and one risk at most."
        }
        (Role::Analyst, Complexity::Complex) => {
            "Cover every affected component, its dependencies, failure modes and migration concerns."
        }
        (Role::Planner, Complexity::Simple) => "A short plan of at most five steps.",
        (Role::Planner, Complexity::Complex) => {
            "A full plan with ordered steps, affected files, interfaces that change and a verification strategy."
        }
        (Role::Builder, Complexity::Simple) => {
            "Make the smallest change that satisfies the request."
        }
        (Role::Builder, Complexity::Complex) => {
            "Implement the complete change, including error handling and any needed configuration."
        }
        (Role::Tester, Complexity::Simple) => {
            "Minimal test set: the happy path plus one edge case."
        }
        (Role::Tester, Complexity::Complex) => {
            "Full coverage: happy paths, edge cases, error paths and integration between changed components."
        }
        (Role::Reviewer, Complexity::Simple) => "Check the diff for obvious defects only.",
        (Role::Reviewer, Complexity::Complex) => {
            "Thorough review: correctness, concurrency, error handling, security and test adequacy."
        }
    }
}

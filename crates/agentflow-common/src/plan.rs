use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::role::{Complexity, ExecutionMode, Role};

/// One role invocation within a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub role: Role,
    /// Roles that must reach `completed` before this step may start.
    #[serde(default)]
    pub depends_on: BTreeSet<Role>,
    /// Free-form scope directive, e.g. testing depth.
    #[serde(default)]
    pub constraints: String,
    /// Task-specific instructions produced by the plan-synthesis call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
}

impl WorkflowStep {
    pub fn new(role: Role, constraints: impl Into<String>) -> Self {
        Self {
            role,
            depends_on: BTreeSet::new(),
            constraints: constraints.into(),
            brief: None,
        }
    }

    pub fn after(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.depends_on.extend(roles);
        self
    }

    pub fn with_brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = Some(brief.into());
        self
    }
}

/// The ordered, dependency-annotated set of roles chosen for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub mode: ExecutionMode,
    pub complexity: Complexity,
    pub steps: Vec<WorkflowStep>,
    /// Planner-provided overview of the approach, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl WorkflowPlan {
    pub fn new(mode: ExecutionMode, complexity: Complexity, steps: Vec<WorkflowStep>) -> Self {
        Self {
            mode,
            complexity,
            steps,
            summary: None,
        }
    }

    pub fn roles(&self) -> Vec<Role> {
        self.steps.iter().map(|s| s.role).collect()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.steps.iter().any(|s| s.role == role)
    }

    pub fn step(&self, role: Role) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.role == role)
    }

    pub fn step_mut(&mut self, role: Role) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.role == role)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Roles no other step depends on.
    pub fn leaf_roles(&self) -> Vec<Role> {
        self.steps
            .iter()
            .filter(|s| !self.steps.iter().any(|o| o.depends_on.contains(&s.role)))
            .map(|s| s.role)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> WorkflowPlan {
        WorkflowPlan::new(
            ExecutionMode::Sequential,
            Complexity::Simple,
            vec![
                WorkflowStep::new(Role::Builder, ""),
                WorkflowStep::new(Role::Tester, "").after([Role::Builder]),
            ],
        )
    }

    #[test]
    fn roles_preserve_plan_order() {
        assert_eq!(chain().roles(), vec![Role::Builder, Role::Tester]);
    }

    #[test]
    fn leaf_roles_of_chain_and_fork() {
        assert_eq!(chain().leaf_roles(), vec![Role::Tester]);

        let fork = WorkflowPlan::new(
            ExecutionMode::Graph,
            Complexity::Complex,
            vec![
                WorkflowStep::new(Role::Builder, ""),
                WorkflowStep::new(Role::Tester, "").after([Role::Builder]),
                WorkflowStep::new(Role::Reviewer, "").after([Role::Builder]),
            ],
        );
        assert_eq!(fork.leaf_roles(), vec![Role::Tester, Role::Reviewer]);
    }

    #[test]
    fn step_lookup_and_brief() {
        let mut plan = chain();
        plan.step_mut(Role::Tester).unwrap().brief = Some("cover the parser".to_string());
        assert_eq!(
            plan.step(Role::Tester).and_then(|s| s.brief.as_deref()),
            Some("cover the parser")
        );
        assert!(!plan.contains(Role::Analyst));
    }

    #[test]
    fn depends_on_serializes_as_role_names() {
        let json = serde_json::to_value(chain()).unwrap();
        assert_eq!(json["steps"][1]["depends_on"][0], "builder");
        assert_eq!(json["mode"], "sequential");
    }
}

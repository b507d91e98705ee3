//! Builds a validated dependency graph from a workflow plan.

use std::collections::{HashMap, HashSet};

use agentflow_common::{ExecutionMode, Role, WorkflowPlan, WorkflowStep};
use thiserror::Error;

/// Index into the plan's step list.
pub type StepIndex = usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("Duplicate role in plan: {0}")]
    Duplicate(Role),

    #[error("Unknown dependency '{dependency}' in step '{role}': no step with that role exists")]
    UnknownDependency { role: Role, dependency: Role },

    #[error("Cycle detected in step dependencies. Involved roles: {0:?}")]
    Cycle(Vec<Role>),

    #[error("{mode} plan is malformed: {reason}")]
    Shape { mode: ExecutionMode, reason: String },
}

/// A directed acyclic graph over the steps of one plan.
#[derive(Debug, Clone)]
pub struct StepGraph {
    steps: Vec<WorkflowStep>,
    index_map: HashMap<Role, StepIndex>,
    /// index -> steps that depend on it
    forward_edges: Vec<Vec<StepIndex>>,
    /// index -> steps it depends on
    reverse_edges: Vec<Vec<StepIndex>>,
}

impl StepGraph {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: StepIndex) -> Option<&WorkflowStep> {
        self.steps.get(index)
    }

    pub fn index_of(&self, role: Role) -> Option<StepIndex> {
        self.index_map.get(&role).copied()
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn dependents(&self, index: StepIndex) -> &[StepIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn dependencies(&self, index: StepIndex) -> &[StepIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Steps with no dependencies.
    pub fn roots(&self) -> Vec<StepIndex> {
        self.reverse_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Steps nothing depends on.
    pub fn leaves(&self) -> Vec<StepIndex> {
        self.forward_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn dependencies_satisfied(&self, index: StepIndex, completed: &HashSet<StepIndex>) -> bool {
        self.dependencies(index)
            .iter()
            .all(|dep| completed.contains(dep))
    }
}

pub struct GraphBuilder {
    mode: ExecutionMode,
    steps: Vec<WorkflowStep>,
}

impl GraphBuilder {
    pub fn new(plan: &WorkflowPlan) -> Self {
        Self {
            mode: plan.mode,
            steps: plan.steps.clone(),
        }
    }

    /// Build the step graph.
    ///
    /// Rejects empty plans, duplicate roles, unknown dependencies, cycles,
    /// and dependency shapes that contradict the plan's execution mode.
    pub fn build(self) -> Result<StepGraph, PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut index_map = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            if index_map.insert(step.role, i).is_some() {
                return Err(PlanError::Duplicate(step.role));
            }
        }

        let mut forward_edges: Vec<Vec<StepIndex>> = vec![Vec::new(); self.steps.len()];
        let mut reverse_edges: Vec<Vec<StepIndex>> = vec![Vec::new(); self.steps.len()];

        for (to_idx, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                let from_idx = *index_map
                    .get(dep)
                    .ok_or(PlanError::UnknownDependency {
                        role: step.role,
                        dependency: *dep,
                    })?;
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let graph = StepGraph {
            steps: self.steps,
            index_map,
            forward_edges,
            reverse_edges,
        };

        Self::validate_no_cycles(&graph)?;
        Self::validate_shape(self.mode, &graph)?;

        Ok(graph)
    }

    /// Kahn's algorithm; any step left with in-degree > 0 sits on a cycle.
    fn validate_no_cycles(graph: &StepGraph) -> Result<(), PlanError> {
        let mut in_degree: Vec<usize> = graph.reverse_edges.iter().map(|deps| deps.len()).collect();

        let mut queue: Vec<StepIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;

        while let Some(node) = queue.pop() {
            processed += 1;

            for &dependent in graph.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != graph.len() {
            let cycle_roles: Vec<Role> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .filter_map(|(i, _)| graph.step(i).map(|s| s.role))
                .collect();
            return Err(PlanError::Cycle(cycle_roles));
        }

        Ok(())
    }

    fn validate_shape(mode: ExecutionMode, graph: &StepGraph) -> Result<(), PlanError> {
        let shape_error = |reason: String| PlanError::Shape { mode, reason };

        match mode {
            ExecutionMode::Sequential => {
                for (i, step) in graph.steps.iter().enumerate() {
                    let deps = graph.dependencies(i);
                    let expected: &[StepIndex] = if i == 0 { &[] } else { &[i - 1] };
                    if deps != expected {
                        let predecessor = if i == 0 {
                            "none".to_string()
                        } else {
                            graph.steps[i - 1].role.to_string()
                        };
                        return Err(shape_error(format!(
                            "step '{}' must depend only on its predecessor ({})",
                            step.role, predecessor
                        )));
                    }
                }
            }
            ExecutionMode::Parallel => {
                if let Some(step) = graph.steps.iter().find(|s| !s.depends_on.is_empty()) {
                    return Err(shape_error(format!(
                        "step '{}' has dependencies but parallel steps must be independent",
                        step.role
                    )));
                }
            }
            ExecutionMode::Graph => {}
        }

        Ok(())
    }
}

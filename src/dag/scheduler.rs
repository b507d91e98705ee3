//! Step scheduler: tracks per-step status and hands out ready steps.
//!
//! A step is ready once every step it depends on has completed. The first
//! failure (or an explicit halt) stops all not-yet-started steps; they end
//! up `Skipped` and never produce an agent record.

use std::collections::HashSet;

use agentflow_common::{Role, WorkflowPlan, WorkflowStep};
use serde::{Deserialize, Serialize};

use super::builder::{GraphBuilder, PlanError, StepGraph, StepIndex};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed { error: String },
    /// Never started because the workflow halted first.
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Skipped)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Debug)]
pub struct StepScheduler {
    graph: StepGraph,
    statuses: Vec<StepStatus>,
    completed: HashSet<StepIndex>,
    halted: bool,
}

impl StepScheduler {
    pub fn from_plan(plan: &WorkflowPlan) -> Result<Self, PlanError> {
        let graph = GraphBuilder::new(plan).build()?;
        let statuses = vec![StepStatus::Pending; graph.len()];
        Ok(Self {
            graph,
            statuses,
            completed: HashSet::new(),
            halted: false,
        })
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    pub fn step(&self, role: Role) -> Option<&WorkflowStep> {
        self.graph.index_of(role).and_then(|i| self.graph.step(i))
    }

    pub fn status(&self, role: Role) -> Option<&StepStatus> {
        self.graph.index_of(role).and_then(|i| self.statuses.get(i))
    }

    /// Plan index of a role.
    pub fn position(&self, role: Role) -> Option<usize> {
        self.graph.index_of(role)
    }

    /// Groups of roles that could run together once all earlier groups finish.
    pub fn compute_waves(&self) -> Vec<Vec<Role>> {
        let mut waves = Vec::new();
        let mut done: HashSet<StepIndex> = HashSet::new();

        loop {
            let ready: Vec<StepIndex> = (0..self.graph.len())
                .filter(|i| !done.contains(i) && self.graph.dependencies_satisfied(*i, &done))
                .collect();

            if ready.is_empty() {
                break;
            }

            done.extend(ready.iter().copied());
            waves.push(
                ready
                    .into_iter()
                    .filter_map(|i| self.graph.step(i).map(|s| s.role))
                    .collect(),
            );
        }

        waves
    }

    /// Pending steps whose dependencies have all completed, in plan order.
    /// Empty once the scheduler is halted.
    pub fn ready_steps(&self) -> Vec<Role> {
        if self.halted {
            return Vec::new();
        }
        self.statuses
            .iter()
            .enumerate()
            .filter(|(i, status)| {
                **status == StepStatus::Pending
                    && self.graph.dependencies_satisfied(*i, &self.completed)
            })
            .filter_map(|(i, _)| self.graph.step(i).map(|s| s.role))
            .collect()
    }

    pub fn mark_running(&mut self, role: Role) {
        if let Some(idx) = self.graph.index_of(role) {
            self.statuses[idx] = StepStatus::Running;
        }
    }

    pub fn mark_completed(&mut self, role: Role) {
        if let Some(idx) = self.graph.index_of(role) {
            self.statuses[idx] = StepStatus::Completed;
            self.completed.insert(idx);
        }
    }

    /// Record a failure and stop scheduling anything new.
    pub fn mark_failed(&mut self, role: Role, error: &str) {
        if let Some(idx) = self.graph.index_of(role) {
            self.statuses[idx] = StepStatus::Failed {
                error: error.to_string(),
            };
        }
        self.halt();
    }

    /// Stop scheduling: every pending step becomes skipped. Running steps
    /// are left for the caller to resolve.
    pub fn halt(&mut self) {
        self.halted = true;
        for status in &mut self.statuses {
            if *status == StepStatus::Pending {
                *status = StepStatus::Skipped;
            }
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn running(&self) -> Vec<Role> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == StepStatus::Running)
            .filter_map(|(i, _)| self.graph.step(i).map(|s| s.role))
            .collect()
    }

    /// Nothing running and nothing left to start.
    pub fn is_finished(&self) -> bool {
        self.running().is_empty() && self.ready_steps().is_empty()
    }

    pub fn all_success(&self) -> bool {
        self.statuses.iter().all(StepStatus::is_success)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Roles of completed steps that nothing else depends on.
    pub fn completed_leaves(&self) -> Vec<Role> {
        self.graph
            .leaves()
            .into_iter()
            .filter(|i| self.completed.contains(i))
            .filter_map(|i| self.graph.step(i).map(|s| s.role))
            .collect()
    }
}

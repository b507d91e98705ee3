//! Dependency graph over workflow steps.
//!
//! Every execution mode is driven through the same graph: a sequential plan
//! is a chain, a parallel plan has no edges, and a general plan is any DAG
//! over roles.
//!
//! 1. **Builder** validates a [`WorkflowPlan`](agentflow_common::WorkflowPlan)
//!    into a [`StepGraph`] (unique roles, known dependencies, no cycles, shape
//!    consistent with the mode).
//! 2. **Scheduler** tracks step status and yields the steps that are ready.
//!
//! ```
//! use agentflow::dag::StepScheduler;
//! use agentflow_common::{Complexity, ExecutionMode, Role, WorkflowPlan, WorkflowStep};
//!
//! let plan = WorkflowPlan::new(
//!     ExecutionMode::Graph,
//!     Complexity::Complex,
//!     vec![
//!         WorkflowStep::new(Role::Builder, ""),
//!         WorkflowStep::new(Role::Tester, "").after([Role::Builder]),
//!         WorkflowStep::new(Role::Reviewer, "").after([Role::Builder]),
//!     ],
//! );
//! let scheduler = StepScheduler::from_plan(&plan).unwrap();
//! assert_eq!(
//!     scheduler.compute_waves(),
//!     vec![vec![Role::Builder], vec![Role::Tester, Role::Reviewer]]
//! );
//! ```

mod builder;
mod scheduler;

pub use builder::{GraphBuilder, PlanError, StepGraph, StepIndex};
pub use scheduler::{StepScheduler, StepStatus};

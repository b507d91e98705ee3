pub mod artifacts;
pub mod config;
pub mod context;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod invoke;
pub mod ledger;
pub mod logging;
pub mod planner;
pub mod store;

pub use engine::{Orchestrator, TaskOutcome, TaskRequest};
pub use errors::WorkflowError;

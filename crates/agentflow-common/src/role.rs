use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named specialization an agent plays within a workflow.
///
/// Variants are declared in pipeline order; `Ord` follows that order so
/// role sets iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Analyst,
    Planner,
    Builder,
    Tester,
    Reviewer,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Analyst,
        Role::Planner,
        Role::Builder,
        Role::Tester,
        Role::Reviewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyst => "analyst",
            Self::Planner => "planner",
            Self::Builder => "builder",
            Self::Tester => "tester",
            Self::Reviewer => "reviewer",
        }
    }

    /// Roles that check the builder's work rather than produce it.
    pub fn is_verification(&self) -> bool {
        matches!(self, Self::Tester | Self::Reviewer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "analyst" => Ok(Self::Analyst),
            "planner" => Ok(Self::Planner),
            "builder" => Ok(Self::Builder),
            "tester" => Ok(Self::Tester),
            "reviewer" => Ok(Self::Reviewer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Kind of work a task asks for. Unknown kinds are kept verbatim as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    FeatureImplementation,
    BugFix,
    Refactoring,
    Documentation,
    Testing,
    Custom(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::FeatureImplementation => "feature_implementation",
            Self::BugFix => "bug_fix",
            Self::Refactoring => "refactoring",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "" => Err("Task type cannot be empty".to_string()),
            "feature_implementation" | "feature" => Ok(Self::FeatureImplementation),
            "bug_fix" | "bugfix" | "bug" => Ok(Self::BugFix),
            "refactoring" | "refactor" => Ok(Self::Refactoring),
            "documentation" | "docs" => Ok(Self::Documentation),
            "testing" | "tests" => Ok(Self::Testing),
            _ => Ok(Self::Custom(normalized)),
        }
    }
}

/// Coarse classification used to scope planning depth and testing thoroughness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Complex => "complex",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller preference for including the analyst role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystPreference {
    #[default]
    Auto,
    Yes,
    No,
}

impl FromStr for AnalystPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "yes" | "true" | "always" => Ok(Self::Yes),
            "no" | "false" | "never" => Ok(Self::No),
            _ => Err(format!(
                "Invalid analyst preference '{}'. Valid values: auto, yes, no",
                s
            )),
        }
    }
}

impl fmt::Display for AnalystPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Yes => write!(f, "yes"),
            Self::No => write!(f, "no"),
        }
    }
}

/// How the steps of a plan relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// A single linear chain executed in plan order.
    #[default]
    Sequential,
    /// Independent steps launched together behind a barrier.
    Parallel,
    /// An arbitrary DAG over roles.
    Graph,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "graph" | "dag" => Ok(Self::Graph),
            _ => Err(format!(
                "Invalid execution mode '{}'. Valid values: sequential, parallel, graph",
                s
            )),
        }
    }
}

//! Per-task token and cost accounting.
//!
//! Only agents that reached `completed` or `failed` are counted. Failed
//! agents contribute tokens but no cost, so a task's billed total always
//! equals the sum over its completed agents.

mod pricing;

pub use pricing::{ModelPricing, PricingTable};

use std::collections::BTreeMap;

use agentflow_common::{Agent, AgentStatus, Role, Task, TokenUsage};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub role: Role,
    pub status: AgentStatus,
    pub tokens: TokenUsage,
    pub cost: f64,
}

/// Running totals at one observation point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LedgerTotals {
    pub cost: f64,
    pub tokens: TokenUsage,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct CostLedger {
    pricing: PricingTable,
    entries: BTreeMap<Uuid, LedgerEntry>,
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new(PricingTable::default())
    }
}

impl CostLedger {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            entries: BTreeMap::new(),
        }
    }

    /// Cost of one call: priced from the table when the model is known,
    /// otherwise the amount the invocation service reported.
    pub fn price(&self, model: Option<&str>, usage: &TokenUsage, reported: f64) -> f64 {
        match model.and_then(|m| self.pricing.lookup(m)) {
            Some(pricing) => pricing.cost(usage),
            None => reported.max(0.0),
        }
    }

    /// Record a terminal agent. Re-recording the same agent replaces its
    /// entry; non-terminal agents are ignored.
    pub fn record(&mut self, agent: &Agent) {
        if !agent.is_terminal() {
            debug!(
                agent_id = %agent.id,
                status = %agent.status,
                "ledger skipped non-terminal agent"
            );
            return;
        }
        let cost = if agent.status == AgentStatus::Completed {
            agent.cost
        } else {
            0.0
        };
        self.entries.insert(
            agent.id,
            LedgerEntry {
                role: agent.role,
                status: agent.status,
                tokens: agent.tokens,
                cost,
            },
        );
    }

    pub fn entry(&self, agent_id: &Uuid) -> Option<&LedgerEntry> {
        self.entries.get(agent_id)
    }

    pub fn totals(&self) -> LedgerTotals {
        self.entries
            .values()
            .fold(LedgerTotals::default(), |mut totals, entry| {
                totals.cost += entry.cost;
                totals.tokens.add(&entry.tokens);
                match entry.status {
                    AgentStatus::Completed => totals.completed += 1,
                    AgentStatus::Failed => totals.failed += 1,
                    _ => {}
                }
                totals
            })
    }

    pub fn total_cost(&self) -> f64 {
        self.totals().cost
    }

    /// Copy the running totals onto the task record.
    pub fn apply_to(&self, task: &mut Task) {
        let totals = self.totals();
        task.total_cost = totals.cost;
        task.total_tokens = totals.tokens.total();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_common::TaskType;

    fn finished(task: &Task, role: Role, ok: bool, tokens: TokenUsage, cost: f64) -> Agent {
        let mut agent = Agent::new(task.id, role, "prompt");
        agent.activate().unwrap();
        if ok {
            agent.complete("out", None, tokens, cost).unwrap();
        } else {
            agent.fail("boom", "", tokens).unwrap();
        }
        agent
    }

    #[test]
    fn test_price_uses_table_or_reported() {
        let ledger = CostLedger::default();
        let usage = TokenUsage::new(1_000_000, 0);
        assert!((ledger.price(Some("claude-haiku-4-5"), &usage, 9.0) - 0.8).abs() < 1e-9);
        assert_eq!(ledger.price(Some("unknown-model"), &usage, 0.42), 0.42);
        assert_eq!(ledger.price(None, &usage, 0.1), 0.1);
        assert_eq!(ledger.price(None, &usage, -1.0), 0.0);
    }

    #[test]
    fn test_totals_count_only_terminal_agents() {
        let task = Task::new("x", TaskType::BugFix);
        let mut ledger = CostLedger::default();

        let ok = finished(&task, Role::Builder, true, TokenUsage::new(100, 50), 0.5);
        let failed = finished(&task, Role::Tester, false, TokenUsage::new(30, 0), 0.0);
        let mut active = Agent::new(task.id, Role::Reviewer, "prompt");
        active.activate().unwrap();

        ledger.record(&ok);
        ledger.record(&failed);
        ledger.record(&active);

        let totals = ledger.totals();
        assert_eq!(totals.cost, 0.5);
        assert_eq!(totals.tokens.total(), 180);
        assert_eq!(totals.completed, 1);
        assert_eq!(totals.failed, 1);
        assert!(ledger.entry(&active.id).is_none());
    }

    #[test]
    fn test_rerecording_does_not_double_count() {
        let task = Task::new("x", TaskType::BugFix);
        let mut ledger = CostLedger::default();
        let agent = finished(&task, Role::Builder, true, TokenUsage::new(10, 10), 0.25);
        ledger.record(&agent);
        ledger.record(&agent);
        assert_eq!(ledger.total_cost(), 0.25);
    }

    #[test]
    fn test_apply_to_task() {
        let mut task = Task::new("x", TaskType::Refactoring);
        let mut ledger = CostLedger::default();
        let tokens = TokenUsage::with_cache(10, 5, 3, 2);
        ledger.record(&finished(&task, Role::Builder, true, tokens, 1.0));
        ledger.apply_to(&mut task);
        assert_eq!(task.total_cost, 1.0);
        assert_eq!(task.total_tokens, 20);
    }
}

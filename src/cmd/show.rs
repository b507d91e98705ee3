//! `agentflow show` and `agentflow list`.

use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

use agentflow::config::EngineConfig;
use agentflow::store::{JsonFileStore, TaskStore};

pub async fn cmd_show(project_dir: &Path, config: &EngineConfig, task_id: &str) -> Result<()> {
    let id = Uuid::parse_str(task_id).with_context(|| format!("Invalid task id: {}", task_id))?;
    let store = JsonFileStore::new(config.state_dir(project_dir));

    let Some(task) = store.load_task(id).await? else {
        anyhow::bail!("Task {} not found in {}", id, store.dir().display());
    };
    let agents = store.list_agents(id).await?;

    println!("Task {}", task.id);
    println!("  description: {}", task.description);
    println!("  type:        {}", task.task_type);
    if let Some(complexity) = task.complexity {
        println!("  complexity:  {}", complexity);
    }
    println!("  status:      {}", task.status);
    println!("  cost:        ${:.4}", task.total_cost);
    println!("  tokens:      {}", task.total_tokens);
    if let Some(plan) = &task.workflow {
        let roles: Vec<String> = plan.roles().iter().map(|r| r.to_string()).collect();
        println!("  workflow:    {} [{}]", plan.mode, roles.join(", "));
    }
    if let Some(error) = &task.error {
        println!("  error:       {}", error);
    }

    if !agents.is_empty() {
        println!();
        println!("Agents:");
        let log_dir = config.log_dir(project_dir);
        for agent in &agents {
            println!(
                "  {} {:<9} {:<9} ${:.4} {:>8} tokens  {}",
                agent.id,
                agent.role.to_string(),
                agent.status.to_string(),
                agent.cost,
                agent.tokens.total(),
                log_dir
                    .join(task.id.to_string())
                    .join(agent.id.to_string())
                    .display()
            );
        }
    }

    if let Some(result) = &task.result {
        println!();
        println!("{}", result);
    }
    Ok(())
}

pub async fn cmd_list(project_dir: &Path, config: &EngineConfig) -> Result<()> {
    let store = JsonFileStore::new(config.state_dir(project_dir));
    let tasks = store.list_tasks().await?;
    if tasks.is_empty() {
        println!("No tasks found in {}", store.dir().display());
        return Ok(());
    }
    for task in tasks {
        println!(
            "{}  {:<11} ${:>8.4}  {}",
            task.id,
            task.status.to_string(),
            task.total_cost,
            task.description.lines().next().unwrap_or_default()
        );
    }
    Ok(())
}

//! `agentflow run` and `agentflow plan`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use agentflow::artifacts::ArtifactWriter;
use agentflow::config::EngineConfig;
use agentflow::engine::{Orchestrator, TaskRequest};
use agentflow::executor::ExecutorEvent;
use agentflow::invoke::ClaudeCliInvoker;
use agentflow::planner::TaskPlanner;
use agentflow::store::JsonFileStore;

use super::super::PlanArgs;

fn request(args: &PlanArgs) -> TaskRequest {
    TaskRequest {
        description: args.description.clone(),
        task_type: args.task_type.clone(),
        analyst: args.analyst,
        mode: args.mode,
    }
}

pub fn cmd_plan(config: &EngineConfig, args: &PlanArgs) -> Result<()> {
    let request = request(args);
    let plan = TaskPlanner::from_config(config).draft(
        &request.description,
        &request.task_type,
        request.analyst.unwrap_or(config.engine.analyst),
        request.mode.unwrap_or(config.engine.default_mode),
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?
    );
    Ok(())
}

pub async fn cmd_run(project_dir: &Path, config: EngineConfig, args: &PlanArgs) -> Result<()> {
    let invoker = ClaudeCliInvoker::from_config(&config).with_working_dir(project_dir);
    let store = JsonFileStore::new(config.state_dir(project_dir));
    let artifacts = ArtifactWriter::new(config.log_dir(project_dir));

    let (tx, mut rx) = mpsc::channel::<ExecutorEvent>(64);
    let orchestrator = Arc::new(
        Orchestrator::new(config, Arc::new(invoker), Arc::new(store), artifacts)
            .with_event_channel(tx),
    );

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let task = orchestrator.create(&request(args)).await?;
    println!("Task {}", task.id);

    let cancel_handle = Arc::clone(&orchestrator);
    let task_id = task.id;
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling task {} ...", task_id);
            cancel_handle.cancel(task_id);
        }
    });

    let outcome = orchestrator.run(task).await;
    ctrl_c.abort();
    ctrl_c.await.ok();
    drop(orchestrator);
    printer.await.ok();

    let task = &outcome.task;
    println!();
    println!("Status:  {}", task.status);
    println!("Cost:    ${:.4}", task.total_cost);
    println!("Tokens:  {}", task.total_tokens);
    if let Some(result) = &task.result {
        println!();
        println!("{}", result);
    }

    if let Some(err) = outcome.error {
        anyhow::bail!(err);
    }
    Ok(())
}

fn print_event(event: &ExecutorEvent) {
    match event {
        ExecutorEvent::WavesPlanned { waves } => {
            for (i, wave) in waves.iter().enumerate() {
                let roles: Vec<String> = wave.iter().map(|r| r.to_string()).collect();
                println!("  wave {}: {}", i + 1, roles.join(", "));
            }
        }
        ExecutorEvent::StepStarted { role, .. } => println!("  → {}", role),
        ExecutorEvent::StepCompleted { role, cost, totals, .. } => {
            println!("  ✓ {} (${:.4}, running total ${:.4})", role, cost, totals.cost)
        }
        ExecutorEvent::StepFailed { role, error, .. } => println!("  ✗ {}: {}", role, error),
        ExecutorEvent::Cancelled { mode, in_flight } => {
            println!("  cancelled ({}), {} call(s) in flight", mode, in_flight.len())
        }
        ExecutorEvent::Finished { .. } => {}
    }
}

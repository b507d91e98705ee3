//! Configuration view and initialization: `agentflow config`.

use std::path::Path;

use anyhow::{Context, Result};

use agentflow::config::{CONFIG_DIR, CONFIG_FILE, EngineConfig};

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    config: &EngineConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# {}", config_path.display());
            } else {
                println!("# {} not found, showing defaults", config_path.display());
            }
            println!(
                "{}",
                toml::to_string_pretty(config).context("Failed to render configuration")?
            );

            println!("# Effective values (with env overrides)");
            println!("# model = \"{}\"", config.model());
            println!("# command = \"{}\"", config.claude_cmd());

            let warnings = config.validate();
            if !warnings.is_empty() {
                println!();
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            EngineConfig::default().save(&config_path)?;
            println!("Created {} at {}", CONFIG_FILE, config_path.display());
        }
    }

    Ok(())
}

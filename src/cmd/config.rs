//! Configuration view and validation commands: `multispace config`.

use anyhow::Result;
use std::path::Path;

use multispace::config::MultispaceConfig;

use super::super::ConfigCommands;
use super::load_config;

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Multispace Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No multispace.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let config = load_config(config_path, None)?;

            println!("[provider]");
            println!("  hostname = \"{}\"", config.provider.hostname);
            println!(
                "  token = {}",
                if config.provider.token.is_some() {
                    "(set)"
                } else {
                    "(from Terraform CLI credentials)"
                }
            );
            println!("  ssl_skip_verify = {}", config.provider.ssl_skip_verify);
            println!();

            println!("[run]");
            println!("  organization = \"{}\"", config.run.organization);
            println!("  workspace = \"{}\"", config.run.workspace);
            println!("  manual_confirm = {}", config.run.manual_confirm);
            println!("  retry = {}", config.run.retry);
            println!("  retry_attempts = {}", config.run.retry_attempts);
            println!("  retry_backoff_min = {}", config.run.retry_backoff_min);
            println!("  retry_backoff_max = {}", config.run.retry_backoff_max);
            println!("  strict_update = {}", config.run.strict_update);
            println!();

            println!("[poll]");
            println!("  backoff_min_ms = {}", config.poll.backoff_min_ms);
            println!("  backoff_max_ms = {}", config.poll.backoff_max_ms);
            println!(
                "  progress_interval_secs = {}",
                config.poll.progress_interval_secs
            );
            println!();

            println!("[timeouts]");
            println!("  create_minutes = {}", config.timeouts.create_minutes);
            println!("  delete_minutes = {}", config.timeouts.delete_minutes);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = if config_path.exists() {
                MultispaceConfig::load(config_path)?
            } else {
                println!("No multispace.toml found. Checking defaults.");
                MultispaceConfig::default()
            };
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("multispace.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty())
                && !parent.exists()
            {
                std::fs::create_dir_all(parent)?;
            }

            MultispaceConfig::default().save(config_path)?;

            println!("Created multispace.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [provider] hostname, token");
            println!("  - [run] organization, workspace, retry settings");
            println!("  - [poll] and [timeouts] for slow workspaces");
            println!();
        }
    }

    Ok(())
}

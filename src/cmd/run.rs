//! Run resource commands: `multispace create|destroy|read|update`.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use multispace::context::RunContext;
use multispace::errors::{Diagnostics, Severity};
use multispace::lifecycle::RunIdStore;
use multispace::resource::{self, RunResource};
use multispace::state::{DEFAULT_STATE_FILE, StateFile};

use super::super::{Cli, RunArgs};
use super::{connect, load_config};

fn state_path(cli: &Cli) -> PathBuf {
    cli.state_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
}

/// A context cancelled by Ctrl-C.
fn interruptible() -> RunContext {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", console::style("Interrupted, stopping...").yellow());
            on_signal.cancel();
        }
    });
    RunContext::new().with_cancel(token)
}

/// Print diagnostics to stderr. Returns false when any is an error.
fn report(diagnostics: &Diagnostics) -> bool {
    for diagnostic in diagnostics.iter() {
        let label = match diagnostic.severity {
            Severity::Error => console::style("Error:").red().bold(),
            Severity::Warning => console::style("Warning:").yellow().bold(),
        };
        eprintln!("{} {}", label, diagnostic.summary);
        if let Some(detail) = &diagnostic.detail {
            eprintln!("  {}", console::style(detail).dim());
        }
    }
    !diagnostics.has_errors()
}

pub async fn cmd_create(cli: &Cli, config_path: &Path, args: &RunArgs) -> Result<bool> {
    let config = load_config(config_path, Some(&args.overrides()))?;
    let settings = config.run_settings()?;
    let client = Arc::new(connect(&config).await?);
    let store = StateFile::open(state_path(cli))?;

    let mut resource = RunResource::new(client, settings, store);
    let outcome = resource.create(&interruptible()).await;

    if let Some(run) = &outcome.run {
        println!(
            "{} {} ({})",
            console::style("Run").bold(),
            console::style(&run.id).cyan(),
            run.status
        );
    } else if let Some(id) = &outcome.run_id {
        eprintln!("Run {} left for inspection", console::style(id).cyan());
    }
    Ok(report(&outcome.diagnostics))
}

pub async fn cmd_destroy(cli: &Cli, config_path: &Path, args: &RunArgs) -> Result<bool> {
    let config = load_config(config_path, Some(&args.overrides()))?;
    let settings = config.run_settings()?;
    let client = Arc::new(connect(&config).await?);
    let store = StateFile::open(state_path(cli))?;

    let mut resource = RunResource::new(client, settings, store);
    let diagnostics = resource.destroy(&interruptible()).await;
    if !diagnostics.has_errors() {
        println!("{}", console::style("Destroy applied").green());
    }
    Ok(report(&diagnostics))
}

pub async fn cmd_read(cli: &Cli, config_path: &Path, id: Option<&str>) -> Result<bool> {
    let store = StateFile::open(state_path(cli))?;
    let Some(run_id) = id.map(str::to_string).or_else(|| store.current()) else {
        anyhow::bail!(
            "No run identifier recorded in {}. Pass --id to read a specific run.",
            store.path().display()
        );
    };

    let config = load_config(config_path, None)?;
    let client = Arc::new(connect(&config).await?);
    let mut resource = RunResource::new(client, config.settings(), store);

    let outcome = resource.read(&run_id).await;
    match &outcome.run {
        Some(run) => println!("{} {}", console::style(&run.id).cyan(), run.status),
        None if !outcome.diagnostics.has_errors() => {
            println!("Run {} no longer exists; identifier cleared", run_id)
        }
        None => {}
    }
    Ok(report(&outcome.diagnostics))
}

pub fn cmd_update(config_path: &Path) -> Result<bool> {
    let config = load_config(config_path, None)?;
    let diagnostics = resource::update(&config.settings());
    if diagnostics.is_empty() {
        println!("Nothing to update");
    }
    Ok(report(&diagnostics))
}

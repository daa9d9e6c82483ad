//! Command dispatch

use std::io;

use clap::CommandFactory;
use tracing::{debug, instrument};

use crate::application::simulation::{DrainReport, FairnessReport};
use crate::application::Simulation;
use crate::cli::args::{Cli, Commands, ConfigCommands, TreeArgs};
use crate::cli::error::{CliError, CliResult};
use crate::cli::output;
use crate::config::{global_config_path, Settings};
use crate::domain::{NodeShape, TreeDisplay};

/// Shares further than this from an even split are flagged.
const FAIRNESS_TOLERANCE: f64 = 0.05;

pub fn execute_command(cli: &Cli) -> CliResult<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    match &cli.command {
        Some(Commands::Fairness { tree, trials }) => {
            let settings = apply_tree_args(settings, tree)?;
            cmd_fairness(&settings, trials.unwrap_or(settings.simulation.trials))
        }
        Some(Commands::Drain {
            tree,
            workers,
            cancel_every,
        }) => {
            let settings = apply_tree_args(settings, tree)?;
            cmd_drain(
                &settings,
                workers.unwrap_or(settings.simulation.workers),
                cancel_every.or(settings.simulation.cancel_every),
            )
        }
        Some(Commands::Tree { tree }) => cmd_tree(&apply_tree_args(settings, tree)?),
        Some(Commands::Config { command }) => cmd_config(&settings, command),
        Some(Commands::Completion { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "grabtree", &mut io::stdout());
            Ok(())
        }
        None => Ok(()),
    }
}

/// Command-line flags override the loaded settings.
fn apply_tree_args(mut settings: Settings, args: &TreeArgs) -> CliResult<Settings> {
    if !args.clients.is_empty() {
        settings.simulation.clients = args.clients.clone();
    }
    if let Some(seed) = args.seed {
        settings.tree.seed = Some(seed);
    }
    if let Some(root) = args.root {
        settings.tree.root = root.into();
    }
    if args.durable {
        settings.tree.durable = true;
    }
    if settings.simulation.clients.iter().all(|&depth| depth == 0) {
        return Err(CliError::InvalidArgs(
            "at least one client needs a non-zero queue depth".to_string(),
        ));
    }
    debug!(?settings, "effective settings");
    Ok(settings)
}

fn simulation(settings: &Settings) -> Simulation {
    Simulation::new(settings.tree_options(), settings.simulation.clients.clone())
}

#[instrument(skip(settings))]
fn cmd_fairness(settings: &Settings, trials: usize) -> CliResult<()> {
    let report = simulation(settings).fairness(trials)?;
    print_fairness(&report, settings.tree.root);
    Ok(())
}

fn print_fairness(report: &FairnessReport, root: NodeShape) {
    output::header(&format!("{} selections, {} root", report.trials, root));
    for client in &report.clients {
        output::detail(&format!(
            "{:<12} depth {:>6}  selected {:>8}  share {:>6.2}%",
            client.client,
            client.queued,
            client.selected,
            100.0 * report.share(&client.client)
        ));
    }
    let deviation = report.max_deviation();
    if deviation <= FAIRNESS_TOLERANCE {
        output::success(&format!("even split within {:.2}%", 100.0 * deviation));
    } else {
        output::warning(&format!(
            "shares deviate {:.2}% from an even split",
            100.0 * deviation
        ));
    }
}

#[instrument(skip(settings))]
fn cmd_drain(settings: &Settings, workers: usize, cancel_every: Option<usize>) -> CliResult<()> {
    if workers == 0 {
        return Err(CliError::InvalidArgs("workers must be at least 1".to_string()));
    }
    let report = simulation(settings).drain(workers, cancel_every)?;
    print_drain(&report, workers);
    if report.is_clean() {
        Ok(())
    } else {
        Err(CliError::CheckFailed(format!("{report:?}")))
    }
}

fn print_drain(report: &DrainReport, workers: usize) {
    output::header(&format!("drained {} requests with {workers} workers", report.total));
    output::detail(&format!("cancelled      {}", report.cancelled));
    output::detail(&format!("delivered      {}", report.delivered));
    output::detail(&format!("duplicates     {}", report.duplicates));
    output::detail(&format!("drain events   {}", report.root_events));
    output::detail(&format!("left in tree   {}", report.remaining_items));
    if report.is_clean() {
        output::success("every live request delivered exactly once");
    } else {
        output::failure("delivery invariant violated");
    }
}

fn cmd_tree(settings: &Settings) -> CliResult<()> {
    let tree = simulation(settings).tree()?;
    output::info(&tree.to_tree_string());
    Ok(())
}

fn cmd_config(settings: &Settings, command: &ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Show => output::info(&settings.to_toml()?),
        ConfigCommands::Template => output::info(&Settings::template()),
        ConfigCommands::Path => match global_config_path() {
            Some(path) => output::info(&path.display()),
            None => output::warning("no home directory; global config unavailable"),
        },
    }
    Ok(())
}

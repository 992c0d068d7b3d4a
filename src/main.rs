use benchlab::engine::{ExperimentEngine, RemainingWork};
use benchlab::export::csv_rows;
use benchlab::suite::OinkSuite;
use clap::{CommandFactory, Parser};
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("benchlab")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("benchlab.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Engine over every configured dataset; inputs are only listed when first needed.
fn build_engine(config: &Config) -> Result<ExperimentEngine> {
    let mut engine = ExperimentEngine::new(config.engine_config());
    let solvers = config.suite.solvers()?;
    for dataset in &config.suite.datasets {
        let suite = OinkSuite::new(&config.suite.binary, &config.suite.inputs_dir, dataset)
            .context("Failed to set up solver suite")?
            .extensions(config.suite.extensions.iter().cloned())
            .solvers(solvers.clone())
            .env(config.suite.env.clone());
        engine.push_source(suite);
    }
    Ok(engine)
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let Some(command) = &cli.command else {
        Cli::command().print_help().context("Failed to print usage")?;
        return Ok(());
    };

    let mut engine = build_engine(config)?;
    match command {
        Commands::Todo { iterations } => handle_todo_command(&mut engine, iterations.unwrap_or(config.iterations)),
        Commands::Report { group } => handle_report_command(&mut engine, group.as_deref(), config),
        Commands::Run { group } => handle_run_command(&mut engine, group.as_deref(), config).await,
        Commands::Cache => handle_cache_command(&mut engine, config),
        Commands::Csv => handle_csv_command(&mut engine, config),
        Commands::Clean => handle_clean_command(&mut engine, config),
    }
}

fn handle_todo_command(engine: &mut ExperimentEngine, iterations: usize) -> Result<()> {
    info!("Listing groups to do over {} iterations", iterations);
    engine
        .initialize(Some(iterations), false)
        .context("Failed to initialize engine")?;
    for group in engine.todo(true, iterations)? {
        println!("{}", group);
    }
    Ok(())
}

fn handle_report_command(engine: &mut ExperimentEngine, group: Option<&str>, config: &Config) -> Result<()> {
    info!("Reporting group: {:?}", group);
    engine
        .initialize(Some(config.iterations), false)
        .context("Failed to initialize engine")?;
    for line in engine.report(group, true, Some(config.iterations))? {
        println!("{}", line);
    }
    Ok(())
}

async fn handle_run_command(engine: &mut ExperimentEngine, group: Option<&str>, config: &Config) -> Result<()> {
    info!("Running group: {:?}", group);
    engine
        .initialize(Some(config.iterations), false)
        .context("Failed to initialize engine")?;
    engine
        .run(group, Some(config.iterations))
        .await
        .context("Run aborted")?;
    Ok(())
}

fn handle_cache_command(engine: &mut ExperimentEngine, config: &Config) -> Result<()> {
    info!("Updating cache");
    engine
        .initialize(Some(config.iterations), true)
        .context("Failed to initialize engine")?;
    engine.save_cache(true).context("Failed to save cache")?;

    let remaining = engine.remaining(config.iterations)?;
    let total: RemainingWork = remaining.iter().copied().sum();
    println!("Remaining: {}", total);
    for (iteration, work) in remaining.iter().enumerate() {
        println!("Iteration {}: {}", iteration, work);
    }
    Ok(())
}

fn handle_csv_command(engine: &mut ExperimentEngine, config: &Config) -> Result<()> {
    engine
        .initialize(Some(config.iterations), false)
        .context("Failed to initialize engine")?;
    for row in csv_rows(engine, config.iterations)? {
        println!("{}", row);
    }
    Ok(())
}

fn handle_clean_command(engine: &mut ExperimentEngine, config: &Config) -> Result<()> {
    info!("Cleaning errored experiments and cache");
    engine
        .initialize(Some(config.iterations), false)
        .context("Failed to initialize engine")?;
    let removed = engine.clean(Some(config.iterations))?;
    info!("Removed {} files", removed.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments; an invalid invocation prints usage and is not an error
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            e.print().context("Failed to print usage")?;
            return Ok(());
        }
    };

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

use anyhow::{Context as _, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use caresync::cli::args::{Cli, Commands};
use caresync::cli::commands::{self, Context};

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "caresync=debug",
        _ => "caresync=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        print!("{}", commands::completions(shell)?);
        return Ok(());
    }

    let ctx = Context::load(cli.home, cli.output).context("Failed to load configuration")?;

    let output = match cli.command {
        Commands::Enqueue {
            kind,
            resource_type,
            payload,
            priority,
        } => commands::enqueue(&ctx, kind, &resource_type, &payload, priority)?,
        Commands::List { status, limit } => commands::list(&ctx, status, limit)?,
        Commands::Status { offline } => commands::status(&ctx, offline)?,
        Commands::Sync { offline } => commands::sync(&ctx, offline)?,
        Commands::Retry { id, all } => commands::retry(&ctx, id.as_deref(), all)?,
        Commands::Cleanup { older_than_hours } => commands::cleanup(&ctx, older_than_hours)?,
        Commands::Remove { id } => commands::remove(&ctx, &id)?,
        Commands::Clear { force } => commands::clear(&ctx, force)?,
        Commands::Daemon { offline } => commands::daemon(&ctx, offline)?,
        Commands::Completions { .. } => String::new(),
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "trafficnews-harvest",
    version,
    about = "Backfill the archived traffic news feed into a per-incident history"
)]
struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process every minute since the last run (default)
    Run,
    /// Show paths, configuration, cursor and history size
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

/// Returns whether the command report came back ok.
pub fn run() -> Result<bool> {
    let cli = Cli::parse();
    let report = match cli.command.unwrap_or(Command::Run) {
        Command::Run => commands::harvest_run::run()?,
        Command::Status => commands::harvest_status::run()?,
    };
    print_report(&report, cli.json)?;
    Ok(report.ok)
}

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use otapush_state::PreferenceDir;

mod dispatch;
mod render;

use dispatch::StateHandles;
use render::resolve_output_style;

#[derive(Parser, Debug)]
#[command(name = "otapush")]
#[command(about = "Inspect and maintain over-the-air update agent state", long_about = None)]
struct Cli {
    /// State directory the update agent persists into.
    #[arg(long)]
    state_root: PathBuf,
    /// Instance key namespace to operate on.
    #[arg(long, default_value = "main")]
    instance: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarize pending update, rollback history, and telemetry state.
    Status,
    /// List recorded failed updates.
    Failed,
    /// Print and consume the buffered retry status report.
    RetryReport,
    /// Remove pending, failed, and telemetry records for the instance key.
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let style = resolve_output_style(std::io::stdout().is_terminal());
    let handles = StateHandles::open(PreferenceDir::new(&cli.state_root));

    let lines = match cli.command {
        Commands::Status => dispatch::status_lines(&handles, &cli.instance, style)?,
        Commands::Failed => dispatch::failed_lines(&handles, &cli.instance),
        Commands::RetryReport => dispatch::retry_report_lines(&handles, &cli.instance, style)?,
        Commands::Clear => dispatch::clear_lines(&handles, &cli.instance, style)?,
    };
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

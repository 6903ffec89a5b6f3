mod completion;
mod config;
mod dispatch;
mod file_update;
mod flows;
mod logging;
mod render;
mod report;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::completion::CliCompletionShell;
use crate::dispatch::run_cli;
use crate::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "pinprobe")]
#[command(
    about = "Find the newest pinned Python dependency versions that still pass a project's tests",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run(RunArgs),
    Discover { project: PathBuf },
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    project: PathBuf,
    #[arg(long, num_args = 1..)]
    packages: Vec<String>,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    report_only: bool,
    #[arg(long)]
    verbose: bool,
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    #[arg(long)]
    include_prereleases: bool,
    #[arg(long, value_name = "URL")]
    index_url: Option<String>,
    #[arg(long, value_name = "FILE")]
    offline_index: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    python: Option<String>,
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = matches!(&cli.command, Commands::Run(args) if args.verbose);
    init_logging(verbose);
    run_cli(cli)
}

#[cfg(test)]
mod tests;

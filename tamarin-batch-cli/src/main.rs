//! tamarin-batch - batch runner for the Tamarin protocol prover
//!
//! Usage:
//!   tamarin-batch run <recipe.json>              Run every task in the recipe
//!   tamarin-batch check <recipe.json>             Validate and preview a recipe

mod commands;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tamarin-batch")]
#[command(about = "Batch runner for the Tamarin protocol prover", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Skip the interactive confirmation prompt for near-host-capacity
    /// resource ceilings.
    #[arg(short = 'y', long)]
    yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every task in a recipe
    Run {
        /// Path to the recipe JSON file
        recipe: PathBuf,

        /// Write the execution report to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// FIFO, shortest-first, or longest-first admission ordering
        #[arg(long, default_value = "fifo")]
        policy: String,
    },

    /// Validate a recipe and preview the tasks it would expand to
    Check {
        /// Path to the recipe JSON file
        recipe: PathBuf,

        /// Include detailed wellformedness output in the preview
        #[arg(long)]
        report: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Run { recipe, output, policy } => {
            commands::run::execute(&recipe, output.as_deref(), &policy, cli.yes).await
        }
        Commands::Check { recipe, report } => commands::check::execute(&recipe, report).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

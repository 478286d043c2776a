//! Agent test harness with iterative auto-fix.
//!
//! Runs declarative test suites against agent code and, when enabled, asks a
//! language model to rewrite failing regions, learning from every attempt.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use mend::cli;

#[derive(Parser)]
#[command(
    name = "mend",
    version,
    about = "Agent test harness with iterative auto-fix"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List suites in a directory.
    List {
        #[arg(default_value = "suites")]
        dir: PathBuf,
    },
    /// Run a suite once and print results.
    Test { suite: PathBuf },
    /// Run a suite and auto-fix failures.
    Fix { suite: PathBuf },
    /// Print the latest captured fix report.
    Report {
        #[arg(default_value = ".")]
        root: PathBuf,
    },
}

fn main() -> Result<()> {
    harness::logging::init();
    let cli = Cli::parse();
    match cli.command {
        Command::List { dir } => cli::list_suites(&dir),
        Command::Test { suite } => cli::test_suite(&suite),
        Command::Fix { suite } => cli::fix_suite(&suite),
        Command::Report { root } => cli::show_report(&root),
    }
}

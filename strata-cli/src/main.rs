//! `strata` command-line interface

mod commands;
mod error;
mod output;

use clap::{Args, Parser, Subcommand};
use error::CliError;
use std::path::PathBuf;
use std::process::ExitCode;
use strata_core::RunFilter;

#[derive(Parser)]
#[command(name = "strata", version, about = "Schema migrations for SQLite")]
struct Cli {
    /// Configuration file (.json, .yaml or .yml)
    #[arg(
        short,
        long,
        global = true,
        env = "STRATA_CONFIG",
        default_value = "strata.json",
        value_name = "PATH"
    )]
    config: PathBuf,

    /// Log progress and report elapsed time
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List migrations by the given criteria
    #[command(visible_alias = "ls")]
    List(ListArgs),

    /// Apply migrations, in the order given
    Apply {
        /// Ids to apply
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Roll back a migration
    Rollback {
        id: String,
    },

    /// Apply a migration inside a transaction and discard the result
    Test {
        id: String,
    },

    /// Record a migration as applied without running it
    Mark {
        id: String,
    },

    /// Record a migration as unapplied without running it
    Unmark {
        id: String,
    },

    /// Create a new migration file from the template
    Create(CreateArgs),

    /// Remove a migration from the ledger and the migration directory
    Remove {
        id: String,

        /// Do not roll back an applied migration before removing it
        #[arg(long)]
        no_rollback: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Search on migration id
    #[arg(short, long)]
    pub id: Option<String>,

    /// Search on description
    #[arg(short, long)]
    pub description: Option<String>,

    /// Search on author
    #[arg(short, long)]
    pub author: Option<String>,

    /// Search on ticket
    #[arg(short, long)]
    pub ticket: Option<String>,

    /// Show "ran", "unran" or "all" migrations
    #[arg(short, long, default_value_t = RunFilter::Unran)]
    pub ran: RunFilter,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// What the migration will do
    #[arg(short, long, default_value = "")]
    pub description: String,

    /// Ticket relevant to this migration
    #[arg(short, long, default_value = "")]
    pub ticket: String,

    /// Author (defaults to the current user)
    #[arg(short, long)]
    pub author: Option<String>,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = strata_core::Configuration::from_path(&cli.config)?;
    log::debug!("Loaded configuration from {}", cli.config.display());
    let mut migrator = strata_core::Migrator::open(config)?;
    let mut out = std::io::stdout().lock();
    let options = commands::Options {
        verbose: cli.verbose,
        json: cli.json,
    };

    match cli.command {
        Command::List(args) => commands::list(&migrator, &args, options, &mut out),
        Command::Apply { ids } => commands::apply(&mut migrator, &ids, options, &mut out),
        Command::Rollback { id } => commands::rollback(&mut migrator, &id, options, &mut out),
        Command::Test { id } => commands::test(&mut migrator, &id, options, &mut out),
        Command::Mark { id } => commands::mark(&mut migrator, &id, &mut out),
        Command::Unmark { id } => commands::unmark(&mut migrator, &id, &mut out),
        Command::Create(args) => commands::create(&mut migrator, args, options, &mut out),
        Command::Remove { id, no_rollback } => {
            commands::remove(&mut migrator, &id, !no_rollback, &mut out)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

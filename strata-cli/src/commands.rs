//! Subcommand implementations
//!
//! Each command writes its report to `out`; errors propagate to `main`.

use crate::error::CliError;
use crate::output::{render_json, render_table};
use crate::{CreateArgs, ListArgs};
use std::io::Write;
use std::time::Instant;
use strata_core::store::MIGRATION_EXTENSION;
use strata_core::{MigrationFilter, MigrationSummary, Migrator, NewMigration};

/// Output settings shared by every command
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub verbose: bool,
    pub json: bool,
}

pub fn list(
    migrator: &Migrator,
    args: &ListArgs,
    options: Options,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let filter = MigrationFilter {
        id: args.id.clone(),
        description: args.description.clone(),
        author: args.author.clone(),
        ticket: args.ticket.clone(),
        run: args.ran,
    };
    let summaries: Vec<MigrationSummary> = migrator
        .query(&filter)
        .into_iter()
        .map(|unit| unit.summary())
        .collect();
    print_summaries(&summaries, options, out)
}

pub fn apply(
    migrator: &mut Migrator,
    ids: &[String],
    options: Options,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let total = ids.len();
    for (index, id) in ids.iter().enumerate() {
        let started = Instant::now();
        migrator.apply(id)?;
        writeln!(out, "Applied migration {id}. ({} / {total})", index + 1)?;
        report_elapsed(started, options, out)?;
    }
    Ok(())
}

pub fn rollback(
    migrator: &mut Migrator,
    id: &str,
    options: Options,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let started = Instant::now();
    migrator.rollback(id)?;
    writeln!(out, "Rolled back migration {id}.")?;
    report_elapsed(started, options, out)
}

pub fn test(
    migrator: &mut Migrator,
    id: &str,
    options: Options,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let started = Instant::now();
    migrator.test(id)?;
    writeln!(out, "Tested migration {id}. Changes were not saved.")?;
    report_elapsed(started, options, out)
}

pub fn mark(migrator: &mut Migrator, id: &str, out: &mut impl Write) -> Result<(), CliError> {
    migrator.mark(id)?;
    writeln!(out, "Marked migration {id} as run.")?;
    Ok(())
}

pub fn unmark(migrator: &mut Migrator, id: &str, out: &mut impl Write) -> Result<(), CliError> {
    migrator.unmark(id)?;
    writeln!(out, "Marked migration {id} as not run.")?;
    Ok(())
}

pub fn create(
    migrator: &mut Migrator,
    args: CreateArgs,
    options: Options,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let author = args.author.unwrap_or_else(current_user);
    let unit = migrator.create(
        NewMigration::new(args.description)
            .ticket(args.ticket)
            .author(author),
    )?;
    let summary = unit.summary();
    let path = migrator
        .config()
        .directory()
        .join(format!("{}.{MIGRATION_EXTENSION}", summary.id));
    if !options.json {
        writeln!(out, "Created {}", path.display())?;
    }
    print_summaries(&[summary], options, out)
}

pub fn remove(
    migrator: &mut Migrator,
    id: &str,
    rollback_first: bool,
    out: &mut impl Write,
) -> Result<(), CliError> {
    migrator.remove(id, rollback_first)?;
    writeln!(out, "Removed migration {id}.")?;
    Ok(())
}

fn print_summaries(
    summaries: &[MigrationSummary],
    options: Options,
    out: &mut impl Write,
) -> Result<(), CliError> {
    if options.json {
        writeln!(out, "{}", render_json(summaries)?)?;
    } else {
        write!(out, "{}", render_table(summaries))?;
    }
    Ok(())
}

fn report_elapsed(started: Instant, options: Options, out: &mut impl Write) -> Result<(), CliError> {
    if options.verbose {
        writeln!(out, "Took {:.2} seconds.", started.elapsed().as_secs_f64())?;
    }
    Ok(())
}

/// Login name of the current user, empty if unknown
fn current_user() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_default()
}

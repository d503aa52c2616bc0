//! Table and JSON rendering for `strata list`

use strata_core::{MigrationSummary, MISSING_DESCRIPTION};

/// Longest description shown in the table before truncation
const DESCRIPTION_WIDTH: usize = 60;

const HEADERS: [&str; 5] = ["Migration ID", "Description", "Author", "Ticket", "Run Date"];

/// Marker shown in place of a run date for unapplied migrations
const NOT_RUN: &str = "✘";

/// Renders summaries as a bordered text table
pub fn render_table(summaries: &[MigrationSummary]) -> String {
    let rows: Vec<[String; 5]> = summaries.iter().map(row).collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let border = {
        let mut line = String::from("+");
        for width in widths {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
        }
        line
    };

    let mut out = String::new();
    out.push_str(&border);
    out.push('\n');
    out.push_str(&line(&HEADERS.map(str::to_string), &widths));
    out.push_str(&border);
    out.push('\n');
    for row in &rows {
        out.push_str(&line(row, &widths));
    }
    out.push_str(&border);
    out.push('\n');
    out
}

/// Renders summaries as a pretty-printed JSON array
pub fn render_json(summaries: &[MigrationSummary]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(summaries)
}

fn row(summary: &MigrationSummary) -> [String; 5] {
    [
        summary.id.clone(),
        format_description(&summary.description, summary.missing),
        summary.author.clone(),
        summary.ticket.clone(),
        summary
            .run_date
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| NOT_RUN.to_string()),
    ]
}

fn line(cells: &[String; 5], widths: &[usize; 5]) -> String {
    let mut out = String::from("|");
    for (cell, width) in cells.iter().zip(widths) {
        let pad = width - cell.chars().count();
        out.push(' ');
        out.push_str(cell);
        out.push_str(&" ".repeat(pad + 1));
        out.push('|');
    }
    out.push('\n');
    out
}

fn format_description(description: &str, missing: bool) -> String {
    if missing {
        return format!("!! {MISSING_DESCRIPTION}");
    }
    if description.chars().count() > DESCRIPTION_WIDTH {
        let truncated: String = description.chars().take(DESCRIPTION_WIDTH).collect();
        format!("{truncated}…")
    } else {
        description.to_string()
    }
}

//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use storyshots_runner::{CycleReport, Outcome, RunResult, StoryOutcome};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Per-story lines and a summary table
    #[default]
    Table,
    /// The run result as JSON
    Json,
}

/// Print everything a cycle produced
pub fn print_cycle(report: &CycleReport, format: OutputFormat, watching: bool) {
    let result = match &report.outcome {
        Ok(result) => result,
        Err(e) => {
            print_error(&format!("Failed to load stories: {}", e));
            if watching {
                print_info("Waiting for changes...");
            }
            return;
        }
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
        }
        OutputFormat::Table => {
            for outcome in &result.outcomes {
                print_outcome(outcome);
            }
            println!();
            println!("{}", summary_table(result));

            if report.verdict.success {
                print_success(&format!(
                    "{} story(ies) passed in {} ms",
                    result.total(),
                    report.duration_ms
                ));
            } else {
                print_error(&format!(
                    "{} of {} failed",
                    result.failures(),
                    result.total()
                ));
            }
            if watching {
                print_info("Waiting for changes...");
            }
        }
    }
}

fn print_outcome(outcome: &StoryOutcome) {
    println!("  {} {}", status_label(outcome.outcome), outcome.name);
    if let Some(detail) = &outcome.detail {
        if outcome.outcome == Outcome::Errored {
            for line in detail.lines() {
                println!("      {}", colorize_diff_line(line));
            }
        }
    }
}

fn status_label(outcome: Outcome) -> String {
    match outcome {
        Outcome::Matched => "✓ matched".green().to_string(),
        Outcome::Created => "+ created".cyan().to_string(),
        Outcome::Updated => "↻ updated".blue().to_string(),
        Outcome::Errored => "✗ errored".red().to_string(),
        Outcome::Unmatched => "? obsolete".yellow().to_string(),
    }
}

fn colorize_diff_line(line: &str) -> String {
    if line.starts_with("+++") || line.starts_with("---") {
        line.bold().to_string()
    } else if line.starts_with('+') {
        line.green().to_string()
    } else if line.starts_with('-') {
        line.red().to_string()
    } else if line.starts_with("@@") {
        line.cyan().to_string()
    } else {
        line.to_string()
    }
}

/// Counts per outcome
pub fn summary_table(result: &RunResult) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec!["Matched", "Created", "Updated", "Errored", "Obsolete", "Time"]);
    table.add_row(vec![
        Cell::new(result.matched),
        Cell::new(result.created),
        Cell::new(result.updated),
        Cell::new(result.errored),
        Cell::new(result.unmatched),
        Cell::new(format!("{} ms", result.duration_ms)),
    ]);
    table
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_table_counts() {
        let result = RunResult {
            matched: 4,
            errored: 1,
            unmatched: 2,
            duration_ms: 12,
            ..Default::default()
        };
        let rendered = summary_table(&result).to_string();
        assert!(rendered.contains("Obsolete"));
        assert!(rendered.contains("12 ms"));
        assert!(rendered.contains('4'));
    }

    #[test]
    fn test_diff_lines_keep_text() {
        colored::control::set_override(false);
        assert_eq!(colorize_diff_line("+added"), "+added");
        assert_eq!(colorize_diff_line(" context"), " context");
    }
}

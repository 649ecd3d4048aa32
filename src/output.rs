//! Output formatting and styling module.
//!
//! Renders a [`Report`] for the terminal: one line per moved file, one line per
//! failure, then a per-bucket summary table.

use crate::report::Report;
use colored::*;
use std::collections::BTreeMap;
use std::path::Path;

/// Terminal rendering of reports.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Prints every move and failure in `report`, then the summary table.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use downtidy::output::OutputFormatter;
    /// use downtidy::{Config, run_once};
    ///
    /// let config = Config::new("/home/me/Downloads").unwrap();
    /// let report = run_once(&config).unwrap();
    /// OutputFormatter::report(&report);
    /// ```
    pub fn report(report: &Report) {
        if report.dry_run {
            Self::dry_run_notice("Nothing was moved.");
        }

        for record in &report.moved {
            let message = format!(
                "{} → {}/{}",
                file_name(&record.source),
                record.bucket,
                file_name(&record.destination)
            );
            if report.dry_run {
                Self::dry_run_notice(&message);
            } else {
                Self::success(&message);
            }
        }

        for failure in &report.failures {
            Self::error(&format!("{}: {}", file_name(&failure.source), failure.error));
        }

        if report.moved.is_empty() && report.failures.is_empty() {
            println!("{}", "Nothing to organize.".cyan());
            return;
        }

        Self::summary_table(&report.bucket_counts(), report.moved_count());

        if !report.is_clean() {
            Self::warning(&format!(
                "{} {} could not be organized",
                report.failures.len(),
                if report.failures.len() == 1 { "file" } else { "files" }
            ));
        }
    }

    /// Prints a summary table with file counts by bucket.
    pub fn summary_table(bucket_counts: &BTreeMap<&str, usize>, total_files: usize) {
        Self::header("SUMMARY");

        let width = bucket_counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max(6); // "Bucket"

        println!(
            "{:<width$} | {}",
            "Bucket".bold(),
            "Files".bold(),
            width = width
        );
        println!("{}", "-".repeat(width + 10));

        for (bucket, count) in bucket_counts {
            println!(
                "{:<width$} | {} {}",
                bucket,
                count.to_string().green(),
                if *count == 1 { "file" } else { "files" },
                width = width
            );
        }

        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            if total_files == 1 { "file" } else { "files" },
            width = width
        );
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

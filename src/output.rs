//! CLI output formatting for freeze runs.
//!
//! # URL-First Display
//!
//! Output leads with the URL, the thing a developer recognizes from their
//! routing table, and shows the resolved file as secondary context. A run
//! log therefore reads as an inventory of the site rather than of the disk.
//!
//! # Output Format
//!
//! ## Progress (one line per event)
//!
//! ```text
//! / → index.html
//! /post/1 → post/1/index.html
//! /post/1/ → post/1/index.html (alias)
//! /old → old/index.html [301]
//! /legacy/7 skipped (404)
//!     post/1/index.html: created
//! removed post/3/index.html
//! ```
//!
//! ## URL listing
//!
//! ```text
//! 001 GET /
//!     Origin: rule 'index'
//! 002 GET /post/1
//!     Origin: rule 'post' {id: 1}
//! ```
//!
//! ## Summary
//!
//! ```text
//! Files
//! 001 index.html
//!     /
//! 002 post/1/index.html
//!     /post/1
//!     /post/1/
//!
//! Skipped
//!     /legacy/7 (404) from rule 'legacy' {id: 7}
//!
//! Froze 2 files: 2 created, 0 updated, 0 unchanged (2 total)
//! ```
//!
//! # Architecture
//!
//! Each display has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::enumerate::UrlItem;
use crate::freezer::FreezeEvent;
use crate::manifest::RunManifest;
use crate::writer::WriteOutcome;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn outcome_label(outcome: WriteOutcome) -> &'static str {
    match outcome {
        WriteOutcome::Created => "created",
        WriteOutcome::Updated => "updated",
        WriteOutcome::Unchanged => "unchanged",
    }
}

// ============================================================================
// Progress events
// ============================================================================

/// Format a single freeze progress event as display lines.
pub fn format_freeze_event(event: &FreezeEvent) -> Vec<String> {
    match event {
        FreezeEvent::UrlCaptured {
            url,
            path,
            status,
            alias,
        } => {
            let mut line = format!("{} \u{2192} {}", url, path);
            if *alias {
                line.push_str(" (alias)");
            }
            if *status != 200 {
                line.push_str(&format!(" [{}]", status));
            }
            vec![line]
        }
        FreezeEvent::UrlSkipped { url, status } => {
            vec![format!("{} skipped ({})", url, status)]
        }
        FreezeEvent::FileWritten { path, outcome } => {
            vec![format!("{}{}: {}", indent(1), path, outcome_label(*outcome))]
        }
        FreezeEvent::StaleRemoved { path } => vec![format!("removed {}", path)],
    }
}

// ============================================================================
// URL listing
// ============================================================================

/// Format the enumerated URL items, each with its origin as context.
pub fn format_url_list(items: &[UrlItem]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, item) in items.iter().enumerate() {
        lines.push(format!(
            "{} {} {}",
            format_index(i + 1),
            item.method,
            item.url
        ));
        lines.push(format!("{}Origin: {}", indent(1), item.origin));
        if !item.expected_statuses.is_empty() {
            let statuses: Vec<String> = item
                .expected_statuses
                .iter()
                .map(u16::to_string)
                .collect();
            lines.push(format!("{}Expected: {}", indent(1), statuses.join(", ")));
        }
    }
    lines
}

/// Print the URL listing to stdout.
pub fn print_url_list(items: &[UrlItem]) {
    for line in format_url_list(items) {
        println!("{}", line);
    }
}

// ============================================================================
// Run summary
// ============================================================================

/// Format the final manifest: files with their URLs, then skipped URLs and
/// collected binding errors, then totals.
pub fn format_manifest_summary(manifest: &RunManifest) -> Vec<String> {
    let mut lines = Vec::new();

    if !manifest.is_empty() {
        lines.push("Files".to_string());
        for (i, (path, entry)) in manifest.entries.iter().enumerate() {
            lines.push(format!("{} {}", format_index(i + 1), path));
            for url in &entry.urls {
                lines.push(format!("{}{}", indent(1), url));
            }
        }
    }

    if !manifest.skipped.is_empty() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push("Skipped".to_string());
        for skipped in &manifest.skipped {
            lines.push(format!(
                "{}{} ({}) from {}",
                indent(1),
                skipped.url,
                skipped.status,
                skipped.origin
            ));
        }
    }

    if !manifest.binding_errors.is_empty() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push("Binding errors".to_string());
        for err in &manifest.binding_errors {
            lines.push(format!("{}{}", indent(1), err));
        }
    }

    if !lines.is_empty() {
        lines.push(String::new());
    }
    let files = manifest.len();
    lines.push(format!(
        "Froze {} file{}: {}",
        files,
        if files == 1 { "" } else { "s" },
        manifest.stats
    ));
    lines
}

/// Print the run summary to stdout.
pub fn print_manifest_summary(manifest: &RunManifest) {
    for line in format_manifest_summary(manifest) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

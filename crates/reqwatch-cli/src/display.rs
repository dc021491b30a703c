//! Human-readable rendering of cycle results and statistics.
//!
//! Requirement statistics print as a vertical card grouped into sections;
//! cycle results print one line per requirement.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reqwatch_core::{ChangeRecord, MonitorStatistics, RequirementStatistics};
use reqwatch_sync::CycleResult;

const LABEL_WIDTH: usize = 26;
const MAX_LIST_ITEMS: usize = 10;

// ── Cycle results ──

pub fn print_cycle_results(results: &BTreeMap<String, CycleResult>) {
    if results.is_empty() {
        println!("No requirements checked.");
        return;
    }
    for (id, result) in results {
        println!("  {:<20} {}", id, outcome_label(result));
    }
    let extracted = results.values().filter(|r| r.extracted()).count();
    let errors = results.values().filter(|r| r.error.is_some()).count();
    println!();
    println!("{} checked, {} extracted, {} errors", results.len(), extracted, errors);
}

pub fn print_result(id: &str, result: &CycleResult, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("=== {id} ===");
    println!("  {:<LABEL_WIDTH$} {}", "outcome", outcome_label(result));
    if let Some(score) = result.score {
        println!("  {:<LABEL_WIDTH$} {:.3}", "significance", score);
    }
    if !result.fields_changed.is_empty() {
        let fields: Vec<&str> = result.fields_changed.iter().map(|f| f.as_str()).collect();
        println!("  {:<LABEL_WIDTH$} {}", "fields changed", fields.join(", "));
    }
    if let Some(outcome) = &result.extraction_outcome {
        println!("  {:<LABEL_WIDTH$} {}", "artifacts generated", outcome.generated);
        print_list("artifacts created", &outcome.created);
        print_list("upload errors", &outcome.errors);
    }
    Ok(())
}

pub fn print_discovered(found: &[String], added: bool) {
    if found.is_empty() {
        println!("No unmonitored requirements found.");
        return;
    }
    let verb = if added { "Added" } else { "Found" };
    println!("{verb} {} requirement(s):", found.len());
    for id in found {
        println!("  {id}");
    }
}

/// One-line summary: decision plus reason, or the error.
fn outcome_label(result: &CycleResult) -> String {
    if result.not_found {
        return "not found in tracker".into();
    }
    match (result.decision, &result.error) {
        (None, Some(error)) => format!("error: {error}"),
        (None, None) => "no decision".into(),
        (Some(decision), Some(error)) => format!("{decision} failed: {error}"),
        (Some(decision), None) => match result.skip_reason {
            Some(reason) => format!("{decision} ({reason})"),
            None => decision.to_string(),
        },
    }
}

// ── Statistics ──

pub fn print_summary(stats: &MonitorStatistics) {
    println!("=== Monitor ===");
    println!();
    println!("Requirements");
    row("monitored", stats.total_monitored);
    row("extracted", stats.total_extracted);
    row("with changes", stats.requirements_with_changes);
    row("flagged", stats.flagged);
    println!();
    println!("Extractions");
    row("total", stats.total_extractions);
    row("change-triggered", stats.total_change_extractions);
    row("changes recorded", stats.total_changes_recorded);
    row(
        "average per requirement",
        format!("{:.2}", stats.average_extractions_per_requirement),
    );
    if let Some(rate) = stats.success_rate {
        row("succeeded", stats.extractions_succeeded);
        row("failed", stats.extractions_failed);
        row("success rate", format!("{:.1}%", rate * 100.0));
    }
}

pub fn print_requirement_card(stats: &RequirementStatistics) {
    println!("=== {} ===", stats.requirement_id);
    if stats.flagged {
        println!("FLAGGED after {} consecutive errors", stats.consecutive_errors);
    }
    println!();

    println!("Extraction");
    row("artifacts extracted", yes_no(stats.artifacts_extracted));
    row("extraction count", stats.extraction_count);
    row("change extractions", stats.change_extraction_count);
    row("last extraction", timestamp(stats.last_extraction_at));
    row("attempts succeeded", stats.extractions_succeeded);
    row("attempts failed", stats.extractions_failed);
    println!();

    println!("Changes");
    row("recorded", stats.total_changes);
    row("last significance", format!("{:.3}", stats.last_significance));
    if !stats.recent_changes.is_empty() {
        println!("  recent ({}):", stats.recent_changes.len());
        for change in stats.recent_changes.iter().rev().take(MAX_LIST_ITEMS) {
            print_change(change);
        }
    }

    if let Some(error) = &stats.last_error {
        println!();
        println!("Errors");
        row("consecutive", stats.consecutive_errors);
        row("last error at", timestamp(Some(error.at)));
        row("last error", &error.message);
    }
}

fn print_change(change: &ChangeRecord) {
    let fields: Vec<&str> = change.fields_changed.iter().map(|f| f.as_str()).collect();
    print!(
        "    {}  {:.3}  {:<18}",
        change.detected_at.format("%Y-%m-%d %H:%M"),
        change.significance,
        change.decision.as_str()
    );
    if !fields.is_empty() {
        print!("  [{}]", fields.join(", "));
    }
    println!();
}

// ── Helpers ──

fn row(label: &str, value: impl std::fmt::Display) {
    println!("  {label:<LABEL_WIDTH$} {value}");
}

fn print_list(label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("  {} ({}):", label, items.len());
    for item in items.iter().take(MAX_LIST_ITEMS) {
        println!("    {item}");
    }
    if items.len() > MAX_LIST_ITEMS {
        println!("    ... and {} more", items.len() - MAX_LIST_ITEMS);
    }
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".into(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

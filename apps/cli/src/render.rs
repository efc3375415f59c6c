//! Progress and report rendering.

use std::fmt::Write as _;

use colored::Colorize;
use forge_orchestrator::{AnalysisReport, EventDetail, FeedbackItem, RunEvent, RunStatus};

/// One progress line for an event, or `None` for events not worth showing.
pub fn event_line(event: &RunEvent) -> Option<String> {
    let id = event.specialist.as_str();
    match (&event.status, &event.detail) {
        (RunStatus::Pending, _) => None,
        (RunStatus::Running, EventDetail::Tools { labels }) => {
            Some(format!("{} {} using {}", "▸".cyan(), id.bold(), labels.join(", ")))
        }
        (RunStatus::Running, EventDetail::DelegationStarted { count, objective, .. }) => {
            Some(format!("  {} {} sub-agent #{}: {}", "↳".purple(), id, count, objective.dimmed()))
        }
        (RunStatus::Running, EventDetail::DelegationFinished { count, .. }) => {
            Some(format!("  {} {} sub-agent #{} done", "↳".purple(), id, count))
        }
        (RunStatus::Running, _) => Some(format!("{} {} running", "▸".cyan(), id.bold())),
        (_, EventDetail::Complete { items, elapsed_ms }) => Some(format!(
            "{} {} {} items in {}",
            "✓".green(),
            id.bold(),
            items,
            seconds(*elapsed_ms)
        )),
        (_, EventDetail::Error { message, elapsed_ms }) => Some(format!(
            "{} {} failed after {}: {}",
            "✗".red(),
            id.bold(),
            seconds(*elapsed_ms),
            message
        )),
        _ => None,
    }
}

/// Human-readable report.
pub fn human_report(report: &AnalysisReport) -> String {
    let mut out = String::new();

    if report.items.is_empty() {
        out.push_str("No feedback items.\n");
    }
    for item in &report.items {
        write_item(&mut out, item);
    }

    let failed: Vec<&str> =
        report.specialists.iter().filter(|r| !r.is_fulfilled()).map(|r| r.label.as_str()).collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "{} {}", "Failed specialists:".yellow(), failed.join(", "));
    }

    let usage = &report.usage;
    let _ = writeln!(
        out,
        "{} items ({} mechanical) · {} input / {} output tokens · {} searches · {} sub-agents · {}",
        report.items.len(),
        report.mechanical_items,
        usage.input_tokens,
        usage.output_tokens,
        usage.search_invocations,
        usage.sub_calls,
        seconds(report.elapsed_ms)
    );
    out
}

fn write_item(out: &mut String, item: &FeedbackItem) {
    let severity = match item.severity.as_str() {
        "critical" => item.severity.red().bold(),
        "important" => item.severity.yellow(),
        _ => item.severity.normal(),
    };
    let _ = writeln!(out, "#{} [{}] {} ({})", item.id, severity, item.title.bold(), item.category);
    if !item.quote.is_empty() {
        let _ = writeln!(out, "   \"{}\"", item.quote.dimmed());
    }
    if !item.explanation.is_empty() {
        let _ = writeln!(out, "   {}", item.explanation);
    }
    if !item.suggestion.is_empty() {
        let _ = writeln!(out, "   → {}", item.suggestion);
    }
    for source in &item.sources {
        let _ = writeln!(out, "   source: {} {}", source.url, source.title.dimmed());
    }
    if !item.agents.is_empty() {
        let _ = writeln!(out, "   flagged by: {}", item.agents.join(", "));
    }
    out.push('\n');
}

fn seconds(ms: u64) -> String {
    format!("{:.1}s", ms as f64 / 1000.0)
}

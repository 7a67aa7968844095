use std::fmt::Write as _;

use owo_colors::OwoColorize;

use tracelens_runtime::{AggregateReport, ProjectReport};

/// Text rendering of the aggregate report, one block per project.
pub fn render_report(report: &AggregateReport, color: bool) -> String {
    let mut out = String::new();

    for project in &report.projects {
        render_project(&mut out, project, color);
    }

    if !report.failures.is_empty() {
        let heading = format!("{} file(s) could not be processed:", report.failures.len());
        if color {
            let _ = writeln!(out, "{}", heading.red().bold());
        } else {
            let _ = writeln!(out, "{}", heading);
        }
        for failure in &report.failures {
            let _ = writeln!(out, "  {}: {}", failure.path.display(), failure.reason);
        }
    }

    if report.projects.is_empty() && report.failures.is_empty() {
        out.push_str("no session files found\n");
    }

    out
}

fn render_project(out: &mut String, project: &ProjectReport, color: bool) {
    let label = project
        .working_dir
        .clone()
        .unwrap_or_else(|| project.path.display().to_string());
    if color {
        let _ = writeln!(out, "{}", label.bold());
    } else {
        let _ = writeln!(out, "{}", label);
    }

    for session in &project.sessions {
        let summary = &session.session.summary;
        let title = summary.title.as_deref().unwrap_or("(untitled)");
        let when = summary
            .first_timestamp
            .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown time".to_string());

        let _ = writeln!(
            out,
            "  {}  {}  [{} msg, {} tok]",
            when,
            title,
            summary.message_count,
            format_tokens(summary.usage.total()),
        );
    }

    out.push('\n');
}

fn format_tokens(total: u64) -> String {
    if total >= 1_000_000 {
        format!("{:.1}M", total as f64 / 1_000_000.0)
    } else if total >= 1_000 {
        format!("{:.1}k", total as f64 / 1_000.0)
    } else {
        total.to_string()
    }
}

//! Terminal and JSON rendering of a finished session

use std::fmt::Write as _;
use std::path::Path;

use service_validator_core::{
    Case, CheckRecord, EndpointResult, ExceptionRecord, RuleSummary, SessionSummary, to_curl,
};

const WIDTH: usize = 80;

/// What to include besides the always-present sections
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions<'a> {
    pub statistics: bool,
    pub show_tracebacks: bool,
    pub request_log: Option<&'a Path>,
}

/// Live progress line for one endpoint.
#[must_use]
pub fn progress_line(result: &EndpointResult) -> String {
    format!("{} {}", result.label(), result.mark())
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "{:=^WIDTH$}", format!(" {title} "));
}

fn subsection(out: &mut String, label: &str) {
    let _ = writeln!(out, "{:_^WIDTH$}", format!(" {label} "));
}

/// Everything printed after the run, final message included.
#[must_use]
pub fn render_report(summary: &SessionSummary, options: &RenderOptions<'_>) -> String {
    let mut out = String::new();
    out.push('\n');
    render_exceptions(&mut out, summary, options.show_tracebacks);
    render_warnings(&mut out, summary);
    render_errors(&mut out, summary);
    render_totals(&mut out, summary, options.request_log);
    out.push('\n');
    if options.statistics {
        render_statistics(&mut out, summary);
    }
    section(&mut out, &summary.message());
    out
}

fn render_exceptions(out: &mut String, summary: &SessionSummary, show_tracebacks: bool) {
    let failing: Vec<&EndpointResult> = summary.results.iter().filter(|r| r.has_errors()).collect();
    if failing.is_empty() {
        return;
    }
    section(out, "EXCEPTIONS");
    for result in failing {
        subsection(out, &result.label());
        for error in &result.errors {
            render_exception(out, error, show_tracebacks);
            if let Some(case) = &error.case {
                render_case(out, case, None);
                render_seed(out, result.seed);
            }
        }
    }
    if !show_tracebacks {
        let _ = writeln!(
            out,
            "Add this option to your command line parameters to see full tracebacks: --show-exception-tracebacks"
        );
    }
}

fn render_exception(out: &mut String, error: &ExceptionRecord, show_tracebacks: bool) {
    let _ = writeln!(out, "{}: {}", error.context, error.message);
    if show_tracebacks {
        for cause in &error.chain {
            let _ = writeln!(out, "  caused by: {cause}");
        }
    }
}

fn render_warnings(out: &mut String, summary: &SessionSummary) {
    let results: Vec<&EndpointResult> = summary
        .results
        .iter()
        .filter(|r| r.contains_warning())
        .collect();
    if results.is_empty() {
        return;
    }
    section(out, "WARNINGS");
    for result in results {
        render_checks(out, result, &result.unique_warnings());
    }
}

fn render_errors(out: &mut String, summary: &SessionSummary) {
    let results: Vec<&EndpointResult> = summary
        .results
        .iter()
        .filter(|r| r.has_failures() && !r.warn_or_success())
        .collect();
    let results: Vec<(&EndpointResult, Vec<&CheckRecord>)> = results
        .into_iter()
        .map(|r| (r, r.unique_errors()))
        .filter(|(_, checks)| !checks.is_empty())
        .collect();
    if results.is_empty() {
        return;
    }
    section(out, "ERRORS");
    for (result, checks) in results {
        render_checks(out, result, &checks);
    }
}

fn render_checks(out: &mut String, result: &EndpointResult, checks: &[&CheckRecord]) {
    subsection(out, &result.label());
    for (idx, check) in checks.iter().enumerate() {
        if let Some(message) = &check.message {
            let _ = writeln!(out, "{}. {message}\n", idx + 1);
        }
        if let Some(case) = &check.case {
            render_case(out, case, Some(check.name.as_str()));
        }
        if let Some(request) = &check.request {
            let _ = writeln!(
                out,
                "Run this command to reproduce this failure: \n\n    {}",
                to_curl(request)
            );
        }
        render_seed(out, result.seed);
        if idx + 1 != checks.len() {
            out.push_str("\n\n");
        }
    }
}

fn render_case(out: &mut String, case: &Case, check: Option<&str>) {
    let mut rows: Vec<(&str, String)> = Vec::new();
    if let Some(check) = check {
        rows.push(("Check", check.to_string()));
    }
    if !case.path_parameters.is_empty() {
        rows.push(("Path parameters", format!("{:?}", case.path_parameters)));
    }
    if !case.headers.is_empty() {
        let headers: Vec<String> = case
            .headers
            .iter()
            .map(|(k, v)| format!("{k:?}: {v:?}"))
            .collect();
        rows.push(("Headers", format!("{{{}}}", headers.join(", "))));
    }
    if !case.query.is_empty() {
        let query: Vec<String> = case
            .query
            .iter()
            .map(|(k, v)| format!("{k:?}: {v:?}"))
            .collect();
        rows.push(("Query", format!("{{{}}}", query.join(", "))));
    }
    if let Some(body) = &case.body {
        rows.push(("Body", body.to_string()));
    }

    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in rows {
        let _ = writeln!(out, "{key:<width$} : {value}");
    }
    out.push('\n');
}

fn render_seed(out: &mut String, seed: Option<u64>) {
    if let Some(seed) = seed {
        let _ = writeln!(
            out,
            "\nOr add this option to your command line parameters: --hypothesis-seed={seed}"
        );
    }
}

fn render_totals(out: &mut String, summary: &SessionSummary, request_log: Option<&Path>) {
    section(out, "SUMMARY");
    out.push('\n');
    if summary.is_empty() {
        let _ = writeln!(out, "No checks were performed.");
    } else {
        let invoked = |r: &&RuleSummary| r.totals.total > 0;
        let warning: Vec<&RuleSummary> = summary.warning_rules().filter(invoked).collect();
        let regular: Vec<&RuleSummary> = summary.regular_rules().filter(invoked).collect();

        let name_width = warning
            .iter()
            .chain(&regular)
            .map(|r| r.name.len())
            .max()
            .unwrap_or(0)
            + 20;
        let max_total = warning
            .iter()
            .chain(&regular)
            .map(|r| r.totals.total)
            .max()
            .unwrap_or(0);
        let count_width = max_total.to_string().len() * 2 + 20;

        let rule_row = |out: &mut String, rule: &RuleSummary| {
            let counts = format!("{} / {} passed", rule.totals.success, rule.totals.total);
            let _ = writeln!(
                out,
                "    {:name_width$}{:count_width$}{}",
                rule.name, counts, rule.verdict
            );
        };

        if !warning.is_empty() {
            let _ = writeln!(out, "Warning checks:");
            for &rule in &warning {
                rule_row(out, rule);
            }
            out.push('\n');
        }
        if !regular.is_empty() {
            let _ = writeln!(out, "Performed checks:");
            for &rule in &regular {
                rule_row(out, rule);
            }
        }
    }
    if let Some(path) = request_log {
        let _ = writeln!(out, "\nNetwork log: {}", path.display());
    }
}

fn render_statistics(out: &mut String, summary: &SessionSummary) {
    let stats = summary.statistics();
    section(out, "STATISTICS");
    out.push('\n');
    let _ = writeln!(out, "Total warnings: {}", stats.total_warnings);
    let _ = writeln!(out, "Total errors: {}", stats.total_errors);
    for (severity, counts) in [("warnings", &stats.warnings), ("errors", &stats.errors)] {
        if counts.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{severity}");
        for (name, count) in counts {
            let _ = writeln!(out, "{name} : {count}");
        }
    }
    out.push('\n');
}

/// Machine-readable result: the summary, per-endpoint results and exit code.
#[must_use]
pub fn render_json(summary: &SessionSummary, seed: u64) -> serde_json::Value {
    serde_json::json!({
        "summary": summary,
        "endpoints": summary.results,
        "seed": seed,
        "exit_code": summary.exit_code,
    })
}

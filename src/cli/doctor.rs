//! tick doctor command implementation

use crate::diagnostics::{self, Report, Severity};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::store::Store;

pub fn run(store: &Store, output: OutputOptions) -> Result<()> {
    let report = diagnostics::run(store)?;
    let human = report_human(&report);
    emit_success(output, "doctor", &report, Some(&human))?;

    if report.has_errors() {
        return Err(Error::ChecksFailed(report.error_count()));
    }
    Ok(())
}

fn report_human(report: &Report) -> HumanOutput {
    let header = if report.has_errors() {
        "Doctor found problems"
    } else {
        "Doctor: all checks passed"
    };
    let mut human = HumanOutput::new(header);
    human.push_field("Errors", report.error_count().to_string());
    human.push_field("Warnings", report.warning_count().to_string());

    let mut suggestions: Vec<&str> = Vec::new();
    for result in &report.results {
        let details = result.details.as_deref().unwrap_or_default();
        let line = match (result.passed, result.severity) {
            (true, _) => format!("ok    {}", result.name),
            (false, Severity::Error) => format!("error {}: {details}", result.name),
            (false, Severity::Warning) => format!("warn  {}: {details}", result.name),
        };
        human.push_line("Checks", line);
        if let Some(suggestion) = result.suggestion.as_deref() {
            if !suggestions.contains(&suggestion) {
                suggestions.push(suggestion);
            }
        }
    }
    for suggestion in suggestions {
        human.push_next_step(suggestion);
    }
    human
}

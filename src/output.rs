//! Output for tick commands: a JSON envelope for scripts, plain text for people
//!
//! With `--json` every command prints exactly one object on stdout:
//! `{"schema_version", "command", "status", "data" | "error", "next_steps"}`.
//! Human output is a header, aligned `key: value` fields, titled sections and
//! `Next:` hints. Errors go to stderr in human mode.

use std::io::Write;

use serde::Serialize;

use crate::error::{exit_codes, Error, Result};

pub const SCHEMA_VERSION: &str = "tick.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone)]
struct Section {
    title: String,
    lines: Vec<String>,
}

/// Text rendering of one command result
#[derive(Debug, Clone)]
pub struct HumanOutput {
    header: String,
    fields: Vec<(String, String)>,
    sections: Vec<Section>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            fields: Vec::new(),
            sections: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    pub fn push_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Append a line to the section titled `title`, opening it on first use
    pub fn push_line(&mut self, title: &str, line: impl Into<String>) {
        let line = line.into();
        match self.sections.iter_mut().find(|section| section.title == title) {
            Some(section) => section.lines.push(line),
            None => self.sections.push(Section {
                title: title.to_string(),
                lines: vec![line],
            }),
        }
    }

    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "no_steps")]
    next_steps: &'a [String],
}

fn no_steps(steps: &&[String]) -> bool {
    steps.is_empty()
}

fn write_envelope<W: Write, T: Serialize>(mut out: W, envelope: &Envelope<'_, T>) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, envelope)?;
    writeln!(out)?;
    Ok(())
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data: Some(data),
            error: None,
            next_steps: human.map(|h| h.next_steps.as_slice()).unwrap_or_default(),
        };
        return write_envelope(std::io::stdout().lock(), &envelope);
    }

    if options.quiet {
        return Ok(());
    }
    if let Some(human) = human {
        println!("{}", format_human(human));
    }
    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    if json {
        let envelope: Envelope<'_, ()> = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            data: None,
            error: Some(error_body(err)),
            next_steps: &next_steps,
        };
        return write_envelope(std::io::stdout().lock(), &envelope);
    }

    eprintln!("error: {err}");
    if let Some(hint) = next_steps.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

fn error_body(err: &Error) -> ErrorBody {
    ErrorBody {
        message: err.to_string(),
        code: err.exit_code(),
        kind: error_kind(err),
        details: err.details(),
    }
}

pub fn format_human(output: &HumanOutput) -> String {
    let mut lines = vec![output.header.clone()];

    let width = output
        .fields
        .iter()
        .map(|(key, _)| key.chars().count() + 1)
        .max()
        .unwrap_or(0);
    for (key, value) in &output.fields {
        let label = format!("{key}:");
        if value.is_empty() {
            lines.push(format!("  {label}"));
        } else {
            lines.push(format!("  {label:<width$} {value}"));
        }
    }

    for section in &output.sections {
        lines.push(String::new());
        lines.push(format!("{}:", section.title));
        lines.extend(section.lines.iter().map(|line| format!("  {line}")));
    }

    if !output.next_steps.is_empty() {
        lines.push(String::new());
        lines.extend(output.next_steps.iter().map(|step| format!("Next: {step}")));
    }

    lines.join("\n")
}

/// Best-effort command name for error envelopes, before clap has parsed
pub fn infer_command_name_from_args() -> String {
    command_name(std::env::args().skip(1))
}

fn command_name(args: impl IntoIterator<Item = String>) -> String {
    let mut positional = args.into_iter().filter(|arg| !arg.starts_with('-'));

    let Some(command) = positional.next() else {
        return "tick".to_string();
    };

    if matches!(command.as_str(), "dep" | "note") {
        if let Some(sub) = positional.next() {
            return format!("{command} {sub}");
        }
    }
    command
}

fn error_kind(err: &Error) -> &'static str {
    match err.exit_code() {
        exit_codes::USER_ERROR => "user_error",
        exit_codes::REJECTED => "rejected",
        _ => "operation_failed",
    }
}

fn error_next_steps(err: &Error) -> Vec<String> {
    match err {
        Error::NotInitialized(_) => vec!["tick init".to_string()],
        Error::Ambiguous { .. } => vec!["use more characters of the task id".to_string()],
        Error::NotFound(_) => vec!["tick list".to_string()],
        Error::CorruptLog { .. } => vec!["tick doctor".to_string()],
        Error::InvalidConfig(_) => vec!["fix .tick/config.toml then retry".to_string()],
        _ => Vec::new(),
    }
}

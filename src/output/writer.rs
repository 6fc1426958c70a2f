use std::io::{self, Write};

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::execution::ExecutionResult;
use crate::plan::PlanResult;
use crate::strategy::Capabilities;

/// Emits machine-readable results on stdout. Text output goes through
/// [`Display`](crate::cli::Display) instead.
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    pub fn emit_task(&self, output: &TaskOutput<'_>) {
        self.write_json(output);
    }

    pub fn emit_plan(&self, output: &PlanOutput<'_>) {
        self.write_json(output);
    }

    pub fn emit_backends(&self, backends: &[(String, Capabilities)], default: &str) {
        let list: Vec<BackendOutput<'_>> = backends
            .iter()
            .map(|(name, capabilities)| BackendOutput {
                name,
                default: name == default,
                capabilities,
            })
            .collect();
        self.write_json(&list);
    }

    pub fn emit_message(&self, message: &str) {
        match self.format {
            OutputFormat::Text => println!("{message}"),
            OutputFormat::Json => self.write_json(&MessageOutput { message }),
        }
    }

    pub fn emit_value<T: Serialize>(&self, value: &T) {
        self.write_json(value);
    }

    fn write_json<T: Serialize>(&self, value: &T) {
        if let Ok(json) = serde_json::to_string_pretty(value) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{json}");
            let _ = stdout.flush();
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskOutput<'a> {
    pub backend: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
    #[serde(flatten)]
    pub result: &'a ExecutionResult,
}

#[derive(Debug, Serialize)]
pub struct PlanOutput<'a> {
    pub backend: &'a str,
    pub mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
    #[serde(flatten)]
    pub result: &'a PlanResult,
}

#[derive(Debug, Serialize)]
struct BackendOutput<'a> {
    name: &'a str,
    default: bool,
    capabilities: &'a Capabilities,
}

#[derive(Debug, Serialize)]
struct MessageOutput<'a> {
    message: &'a str,
}

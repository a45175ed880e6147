use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use serde_sarif::sarif::{
    Invocation, Location, LogicalLocation, Message, Result as SarifResult, Run, SCHEMA_URL, Sarif,
    Tool, ToolComponent,
};

use crate::error::{AnalysisError, FailureCategory};
use crate::rewrite::StrippedMethod;

pub(crate) const STRIPPED_METHOD_RULE: &str = "stripped-method";

/// One result per method removed from the module.
pub(crate) fn stripped_results(stripped: &[StrippedMethod]) -> Vec<SarifResult> {
    stripped
        .iter()
        .map(|method| {
            SarifResult::builder()
                .rule_id(STRIPPED_METHOD_RULE)
                .message(result_message(format!(
                    "Unreachable method removed: {}.{}",
                    method.class, method.identifier
                )))
                .locations(vec![method_location(&method.class, &method.identifier)])
                .build()
        })
        .collect()
}

/// Result describing the failure that aborted the run, addressed at the offending member.
pub(crate) fn failure_result(error: &AnalysisError) -> SarifResult {
    let location = match error.method() {
        Some(method) => method_location(error.class(), method),
        None => class_location(error.class()),
    };
    let audience = match error.category() {
        FailureCategory::UserError => "module error",
        FailureCategory::Defect => "analyzer defect",
    };
    SarifResult::builder()
        .rule_id(error.reason_code())
        .message(result_message(format!("{audience}: {error}")))
        .locations(vec![location])
        .build()
}

pub(crate) fn build_invocation(successful: bool) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(successful)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

pub(crate) fn build_sarif(results: Vec<SarifResult>, invocation: Invocation) -> Sarif {
    let driver = ToolComponent::builder()
        .name(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = Run::builder()
        .tool(tool)
        .invocations(vec![invocation])
        .results(results)
        .build();

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

/// Write the log to `path`, or to stdout when the path is `-`.
pub(crate) fn write_report(path: &Path, sarif: &Sarif) -> Result<()> {
    let mut writer = output_writer(path)?;
    serde_json::to_writer_pretty(&mut writer, sarif).context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;
    writer.flush().context("failed to write SARIF output")
}

fn output_writer(path: &Path) -> Result<Box<dyn Write>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdout()));
    }
    Ok(Box::new(
        File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
    ))
}

fn method_location(class_name: &str, identifier: &str) -> Location {
    let logical = LogicalLocation::builder()
        .name(format!("{class_name}.{identifier}"))
        .kind("function")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

fn class_location(class_name: &str) -> Location {
    let logical = LogicalLocation::builder()
        .name(class_name)
        .kind("type")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

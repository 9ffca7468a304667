use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Print one command result.
///
/// JSON output serializes `record` as a single line. Table and pretty output
/// render it as field/value pairs sorted by field name.
pub fn print_record<T: Serialize>(record: &T, format: OutputFormat) {
    let value = serde_json::to_value(record).unwrap_or(Value::Null);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (field, value) in fields(&value) {
                table.add_row(vec![field.to_uppercase(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = fields(&value)
                .into_iter()
                .map(|(field, value)| format!("{field}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
    }
}

/// Print several rows sharing the same columns.
pub fn print_rows<T: Serialize>(rows: &[T], format: OutputFormat) {
    let values: Vec<Value> = rows
        .iter()
        .map(|row| serde_json::to_value(row).unwrap_or(Value::Null))
        .collect();
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&values).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let Some(first) = values.first() else {
                return;
            };
            let header: Vec<String> = columns(first)
                .into_iter()
                .map(|(field, _)| field.to_uppercase())
                .collect();
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(header);
            for value in &values {
                table.add_row(columns(value).into_iter().map(|(_, cell)| cell));
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for value in &values {
                let line: Vec<String> = fields(value)
                    .into_iter()
                    .map(|(field, value)| format!("{field}={value}"))
                    .collect();
                println!("{}", line.join(" "));
            }
        }
    }
}

/// Flatten the top level of a serialized record. Nested values are shown
/// as compact JSON; absent optional fields are skipped.
fn fields(value: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = value else {
        return vec![("value".to_string(), cell(value))];
    };
    map.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(field, value)| (field.clone(), cell(value)))
        .collect()
}

/// Like [`fields`] but keeps nulls as `-` so rows line up.
fn columns(value: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = value else {
        return vec![("value".to_string(), cell(value))];
    };
    map.iter()
        .map(|(field, value)| {
            let shown = if value.is_null() { "-".to_string() } else { cell(value) };
            (field.clone(), shown)
        })
        .collect()
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nodel_peer::{HostedNode, NodelPoint};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// One line of `host` or `watch` output: an action ran or an event arrived.
#[derive(Serialize)]
pub struct PointRecord<'a> {
    pub kind: &'static str,
    pub node: &'a str,
    pub point: &'a str,
    pub arg: &'a Option<Value>,
    pub timestamp: String,
}

impl<'a> PointRecord<'a> {
    pub fn new(kind: &'static str, point: &'a NodelPoint, arg: &'a Option<Value>) -> Self {
        Self {
            kind,
            node: point.node.original(),
            point: point.point.original(),
            arg,
            timestamp: now_unix_millis(),
        }
    }
}

#[derive(Serialize)]
pub struct CallRecord<'a> {
    pub node: &'a str,
    pub action: &'a str,
    pub arg: &'a Option<Value>,
    pub wired_after_ms: u128,
}

pub fn print_point(record: &PointRecord<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json_line(record),
        OutputFormat::Table => {
            let mut table = new_table(vec!["KIND", "NODE", "POINT", "ARG"]);
            table.add_row(vec![
                record.kind.to_string(),
                record.node.to_string(),
                record.point.to_string(),
                arg_preview(record.arg),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "{} {}.{} arg={}",
            record.kind,
            record.node,
            record.point,
            arg_preview(record.arg)
        ),
    }
    flush();
}

pub fn print_call(record: &CallRecord<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json_line(record),
        OutputFormat::Table => {
            let mut table = new_table(vec!["NODE", "ACTION", "ARG", "WIRED AFTER"]);
            table.add_row(vec![
                record.node.to_string(),
                record.action.to_string(),
                arg_preview(record.arg),
                format!("{} ms", record.wired_after_ms),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "called {}.{} arg={} (wired after {} ms)",
            record.node,
            record.action,
            arg_preview(record.arg),
            record.wired_after_ms
        ),
    }
    flush();
}

/// Summary of what a host serves. JSON output skips it so stdout carries
/// only the listening line and invocation records.
pub fn print_hosted(nodes: &[HostedNode], format: OutputFormat) {
    match format {
        OutputFormat::Json => {}
        OutputFormat::Table => {
            let mut table = new_table(vec!["NODE", "ACTIONS", "EVENTS"]);
            for node in nodes {
                table.add_row(vec![
                    node.node.clone(),
                    node.actions.join(", "),
                    node.events.join(", "),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for node in nodes {
                println!(
                    "node {}: actions [{}] events [{}]",
                    node.node,
                    node.actions.join(", "),
                    node.events.join(", ")
                );
            }
        }
    }
    flush();
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn print_json_line(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn flush() {
    let _ = std::io::stdout().flush();
}

fn arg_preview(arg: &Option<Value>) -> String {
    match arg {
        Some(value) => value.to_string(),
        None => "-".to_string(),
    }
}

fn now_unix_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_record_serializes_original_names() {
        let point = NodelPoint::new("Lamp 1", "Turn On");
        let arg = Some(serde_json::json!(true));
        let record = PointRecord::new("action", &point, &arg);
        let json = serde_json::to_value(&record).expect("record should serialize");
        assert_eq!(json["kind"], "action");
        assert_eq!(json["node"], "Lamp 1");
        assert_eq!(json["point"], "Turn On");
        assert_eq!(json["arg"], true);
    }

    #[test]
    fn missing_arg_previews_as_dash() {
        assert_eq!(arg_preview(&None), "-");
        assert_eq!(arg_preview(&Some(serde_json::json!({"a": 1}))), "{\"a\":1}");
    }
}

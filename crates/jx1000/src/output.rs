use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use jx1000_device::Event;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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

/// A command result that can be printed in every output format.
pub trait Report: Serialize {
    /// Table header.
    fn header(&self) -> Vec<&'static str>;
    /// Table rows, one cell per header column.
    fn rows(&self) -> Vec<Vec<String>>;
    /// Human-readable lines.
    fn pretty(&self) -> String;
    /// Bare value for scripting.
    fn raw(&self) -> String;
}

pub fn print_report<R: Report>(report: &R, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_json(report)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(report.header());
            for row in report.rows() {
                table.add_row(row);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", report.pretty()),
        OutputFormat::Raw => println!("{}", report.raw()),
    }
}

/// Print one event as it arrives. Tables would be one row each, so the
/// table format prints the console line instead.
pub fn print_event(event: &Event, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_json(event)),
        OutputFormat::Table | OutputFormat::Pretty => println!("{event}"),
        OutputFormat::Raw => println!("{}", event.value),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
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

/// A command result that can be rendered in every output format.
pub trait Render: Serialize {
    /// Label/value rows for table and pretty output.
    fn rows(&self) -> Vec<(&'static str, String)>;

    /// Single-line value for raw output.
    fn raw(&self) -> String;
}

pub fn print<T: Render>(out: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (label, value) in out.rows() {
                table.add_row(vec![label.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let width = out.rows().iter().map(|(l, _)| l.len()).max().unwrap_or(0);
            for (label, value) in out.rows() {
                println!("{:width$}  {value}", format!("{label}:"), width = width + 1);
            }
        }
        OutputFormat::Raw => print_raw(format!("{}\n", out.raw()).as_bytes()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Comma-separated list, or `-` when empty.
pub fn join_list<T: ToString>(items: &[T]) -> String {
    if items.is_empty() {
        return "-".to_string();
    }
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

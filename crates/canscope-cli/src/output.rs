//! Output formatting for canscope (table, json, csv)

use canscope_core::{ErrorCounters, SessionObserver, StatusLevel, StatusMessage};
use canscope_view::FrameRow;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print data in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No frames");
                    }
                } else {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string())
                );
            }
            OutputFormat::Csv => print_csv(data, true),
        }
    }

    /// Print one row of a running listing
    pub fn print_line<T: Serialize>(&self, row: &T, text: &str) {
        match self.format {
            OutputFormat::Table => println!("{}", text),
            OutputFormat::Json => {
                if let Ok(json) = serde_json::to_string(row) {
                    println!("{}", json);
                }
            }
            OutputFormat::Csv => print_csv(std::slice::from_ref(row), false),
        }
    }

    /// Print key-value pairs
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Table => {
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }
            }
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&map).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Csv => {
                let keys: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
                println!("{}", keys.join(","));
                let values: Vec<String> = pairs.iter().map(|(_, v)| escape_csv(v)).collect();
                println!("{}", values.join(","));
            }
        }
    }
}

/// Print data as CSV
fn print_csv<T: Serialize>(data: &[T], header: bool) {
    let Some(first) = data.first() else {
        return;
    };

    let first = serde_json::to_value(first).unwrap_or_default();
    if let serde_json::Value::Object(map) = &first {
        let headers: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        if header {
            println!("{}", headers.join(","));
        }

        for item in data {
            if let Ok(serde_json::Value::Object(row)) = serde_json::to_value(item) {
                let values: Vec<String> = headers
                    .iter()
                    .map(|h| {
                        row.get(*h)
                            .map(|v| match v {
                                serde_json::Value::String(s) => escape_csv(s),
                                serde_json::Value::Null => String::new(),
                                other => escape_csv(&other.to_string()),
                            })
                            .unwrap_or_default()
                    })
                    .collect();
                println!("{}", values.join(","));
            }
        }
    }
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Frame row display for monitor
#[derive(Debug, Tabled, Serialize)]
pub struct FrameRowView {
    #[tabled(rename = "Time")]
    pub time: String,
    #[tabled(rename = "Dir")]
    pub dir: String,
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "DLC")]
    pub dlc: u8,
    #[tabled(rename = "Data")]
    pub data: String,
    #[tabled(rename = "Count")]
    pub count: u64,
    #[tabled(rename = "Period")]
    pub period: String,
}

impl From<&FrameRow> for FrameRowView {
    fn from(row: &FrameRow) -> Self {
        Self {
            time: row.time().to_string(),
            dir: row.dir().to_string(),
            kind: row.kind().to_string(),
            id: row.id().to_string(),
            dlc: row.dlc(),
            data: row.data().to_string(),
            count: row.count(),
            period: row.period(),
        }
    }
}

/// Prints session status and telemetry to stderr
pub struct StatusPrinter {
    quiet: bool,
}

impl StatusPrinter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl SessionObserver for StatusPrinter {
    fn on_message(&self, message: &StatusMessage) {
        let line = message.to_string();
        match message.level {
            StatusLevel::Info if self.quiet => {}
            StatusLevel::Info => eprintln!("{}", line.dimmed()),
            StatusLevel::Warn => eprintln!("{}", line.yellow()),
            StatusLevel::Error | StatusLevel::Exception => eprintln!("{}", line.red()),
        }
    }

    fn on_counters(&self, counters: ErrorCounters) {
        if !self.quiet {
            eprintln!("{}", format!("[counters] tx={} rx={}", counters.tx, counters.rx).cyan());
        }
    }

    fn on_bus_usage(&self, percent: f32) {
        if !self.quiet {
            eprintln!("{}", format!("[bus usage] {:.1}%", percent).cyan());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canscope_core::{Frame, ReceivedFrame};
    use canscope_view::ObservedAt;
    use pretty_assertions::assert_eq;

    #[test]
    fn row_view_copies_display_columns() {
        let frame = ReceivedFrame::outbound(Frame::classic(0x42, &[0xCA, 0xFE], false).unwrap());
        let row = FrameRow::new(&frame, ObservedAt::now());
        let view = FrameRowView::from(&row);
        assert_eq!(view.dir, "Tx");
        assert_eq!(view.kind, "2.0");
        assert_eq!(view.id, "0x042");
        assert_eq!(view.data, "ca fe");
        assert_eq!(view.period, "—");
    }

    #[test]
    fn csv_values_are_escaped() {
        assert_eq!(escape_csv("01 02"), "01 02");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}

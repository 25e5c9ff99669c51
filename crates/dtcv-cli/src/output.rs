//! Output formatting for dtcv (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use dtcv_bench::SchedulerEvent;
use dtcv_core::{DtcEntry, FailureRecord};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
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

    /// Human-readable chatter is only printed for tables
    fn chatty(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Table
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if self.chatty() {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if self.chatty() {
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
                        println!("No data");
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
            OutputFormat::Csv => {
                print!("{}", to_csv(data));
            }
        }
    }

    /// Print a single item in the configured format
    pub fn print_one<T: Tabled + Serialize>(&self, data: &T) {
        match self.format {
            OutputFormat::Table => {
                println!("{}", Table::new([data]));
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Csv => {
                print!("{}", to_csv(&[data]));
            }
        }
    }

    /// Print key-value pairs (for summaries)
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
                let keys: Vec<String> = pairs.iter().map(|(k, _)| escape_csv(k)).collect();
                println!("{}", keys.join(","));
                let values: Vec<String> = pairs.iter().map(|(_, v)| escape_csv(v)).collect();
                println!("{}", values.join(","));
            }
        }
    }

    /// Progress bar over `len` steps, for interactive table output only
    pub fn progress(&self, len: u64) -> Option<ProgressBar> {
        if !self.chatty() {
            return None;
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        Some(pb)
    }

    /// Format one scheduler event for streaming output. `None` for events
    /// that are not shown in the current format.
    pub fn event_line(&self, event: &SchedulerEvent) -> Option<String> {
        match self.format {
            OutputFormat::Json | OutputFormat::Csv => serde_json::to_string(event).ok(),
            OutputFormat::Table if self.quiet => None,
            OutputFormat::Table => describe_event(event),
        }
    }
}

fn describe_event(event: &SchedulerEvent) -> Option<String> {
    let line = match event {
        SchedulerEvent::Started { mode, generation } => {
            format!("Session started ({} mode, generation {})", mode, generation)
        }
        SchedulerEvent::Triggered {
            source_address,
            payload,
        } => format!("DM1 from 0x{:02X}: {}", source_address, payload),
        SchedulerEvent::Countdown { .. } | SchedulerEvent::EntryStarted { .. } => return None,
        SchedulerEvent::AcquisitionFailed { index, reason } => match index {
            Some(index) => format!("DTC {}: acquisition failed: {}", index + 1, reason)
                .yellow()
                .to_string(),
            None => format!("Acquisition failed: {}", reason).yellow().to_string(),
        },
        SchedulerEvent::ResponseSent {
            counter,
            frame,
            result,
        } => format!(
            "#{} {} SPN={} FMI={} LAMP={}",
            counter,
            frame,
            display_opt(result.spn),
            display_opt(result.fmi),
            result.lamp()
        ),
        SchedulerEvent::Verified {
            index,
            matched: true,
            ..
        } => format!("DTC {:3}: PASS", index + 1).green().to_string(),
        SchedulerEvent::Verified {
            failure: Some(record),
            ..
        } => record.to_string().red().to_string(),
        SchedulerEvent::Verified { index, .. } => {
            format!("DTC {:3}: FAIL", index + 1).red().to_string()
        }
        SchedulerEvent::EntryTimedOut { index } => {
            format!("DTC {:3}: no reading within the window", index + 1)
                .red()
                .to_string()
        }
        SchedulerEvent::SequenceCompleted {
            status,
            passed,
            total,
        } => format!("{} ({}/{} passed)", status, passed, total),
        SchedulerEvent::Stopped { reason } => format!("Session stopped: {}", reason),
    };
    Some(line)
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Render data as CSV, one header row plus one row per item
fn to_csv<T: Serialize>(data: &[T]) -> String {
    let mut out = String::new();
    let Some(first) = data.first() else {
        return out;
    };

    // Get field names from the first item
    let Ok(serde_json::Value::Object(map)) = serde_json::to_value(first) else {
        return out;
    };
    let headers: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
    out.push_str(&headers.join(","));
    out.push('\n');

    for item in data {
        if let Ok(serde_json::Value::Object(row)) = serde_json::to_value(item) {
            let values: Vec<String> = headers
                .iter()
                .map(|h| {
                    row.get(*h)
                        .map(|v| match v {
                            serde_json::Value::String(s) => escape_csv(s),
                            other => escape_csv(&other.to_string()),
                        })
                        .unwrap_or_default()
                })
                .collect();
            out.push_str(&values.join(","));
            out.push('\n');
        }
    }
    out
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// =============================================================================
// Display types for various commands
// =============================================================================

/// Frame display for encode and send
#[derive(Debug, Tabled, Serialize)]
pub struct FrameRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "PGN")]
    pub pgn: String,
    #[tabled(rename = "SA")]
    pub source_address: String,
    #[tabled(rename = "Data")]
    pub data: String,
}

impl From<&dtcv_core::CanFrame> for FrameRow {
    fn from(frame: &dtcv_core::CanFrame) -> Self {
        Self {
            id: format!("{:08X}", frame.arbitration_id),
            pgn: format!("{:04X}", frame.pgn()),
            source_address: format!("0x{:02X}", frame.source_address()),
            data: frame.data_hex(),
        }
    }
}

/// Decoded DTC display for decode
#[derive(Debug, Tabled, Serialize)]
pub struct DecodedRow {
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "SPN")]
    pub spn: u32,
    #[tabled(rename = "FMI")]
    pub fmi: u32,
    #[tabled(rename = "Lamp")]
    pub lamp: String,
    #[tabled(rename = "SA")]
    pub source_address: String,
}

/// Validator output for validate
#[derive(Debug, Tabled, Serialize)]
pub struct ValidationRow {
    #[tabled(rename = "Input")]
    pub input: String,
    #[tabled(rename = "Field")]
    pub field: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Confidence")]
    pub confidence: String,
    #[tabled(rename = "Correction")]
    pub correction: String,
}

/// Entry display for entries
#[derive(Debug, Tabled, Serialize)]
pub struct EntryRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "SPN")]
    pub spn: u32,
    #[tabled(rename = "FMI")]
    pub fmi: u8,
    #[tabled(rename = "Lamp")]
    pub lamp: String,
    #[tabled(rename = "SA")]
    pub source_address: String,
    #[tabled(rename = "Display")]
    pub display_code: String,
    #[tabled(rename = "Description")]
    pub description: String,
}

impl EntryRow {
    pub fn new(index: usize, entry: &DtcEntry) -> Self {
        Self {
            index: index + 1,
            spn: entry.spn,
            fmi: entry.fmi,
            lamp: entry.lamp.to_string(),
            source_address: format!("0x{:02X}", entry.source_address),
            display_code: entry.display_code_hex(),
            description: entry.description.clone(),
        }
    }
}

/// Failed entry display for sequence reports
#[derive(Debug, Tabled, Serialize)]
pub struct FailureRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Expected")]
    pub expected: String,
    #[tabled(rename = "Actual")]
    pub actual: String,
    #[tabled(rename = "Mismatch")]
    pub mismatched: String,
}

impl From<&FailureRecord> for FailureRow {
    fn from(record: &FailureRecord) -> Self {
        let actual = if record.timed_out {
            "timed out".to_string()
        } else {
            format!(
                "{}/{}/{}",
                display_opt(record.actual_spn),
                display_opt(record.actual_fmi),
                record.actual_lamp
            )
        };
        let mismatched: Vec<String> = record
            .mismatched
            .iter()
            .map(|m| format!("{:?}", m).to_uppercase())
            .collect();
        Self {
            index: record.index + 1,
            expected: format!(
                "{}/{}/{}",
                record.expected_spn, record.expected_fmi, record.expected_lamp
            ),
            actual,
            mismatched: mismatched.join(","),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtcv_core::{encode_dm1, Lamp};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_rows() {
        let entry = DtcEntry::new(520313, 14, Lamp::Amber, 0)
            .unwrap()
            .with_description("Cluster, left");
        let csv = to_csv(&[EntryRow::new(0, &entry)]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("display_code"));
        assert!(lines[1].contains("\"Cluster, left\""));
        assert!(lines[1].contains("79F00E"));
        assert!(to_csv::<EntryRow>(&[]).is_empty());
    }

    #[test]
    fn test_frame_row() {
        let frame = encode_dm1(520313, 14, Lamp::Amber, 0x10);
        let row = FrameRow::from(&frame);
        assert_eq!(row.id, "18FECA10");
        assert_eq!(row.pgn, "FECA");
        assert_eq!(row.source_address, "0x10");
    }

    #[test]
    fn test_quiet_table_hides_events() {
        let event = SchedulerEvent::EntryTimedOut { index: 2 };
        let quiet = OutputContext::new(OutputFormat::Table, true, true);
        assert_eq!(quiet.event_line(&event), None);

        let json = OutputContext::new(OutputFormat::Json, true, true);
        let line = json.event_line(&event).unwrap();
        assert!(line.contains("\"event\":\"entry_timed_out\""));
    }
}

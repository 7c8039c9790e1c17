//! Human and JSON renderings of command results

use serde_json::{json, Value};

use medsync_core::domain::{LocalRecord, SyncReport};

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Human
        }
    }

    pub fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Sink for command output
pub trait OutputFormatter {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    fn print_json(&self, value: &Value);
}

/// Checkmarks and indentation for a terminal
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("\u{2713} {}", message);
    }
    fn error(&self, message: &str) {
        eprintln!("\u{2717} Error: {}", message);
    }
    fn warn(&self, message: &str) {
        eprintln!("\u{26a0} Warning: {}", message);
    }
    fn info(&self, message: &str) {
        println!("  {}", message);
    }
    fn print_json(&self, _value: &Value) {}
}

/// One JSON document per result on stdout
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        println!("{}", json!({"success": true, "message": message}));
    }
    fn error(&self, message: &str) {
        eprintln!("{}", json!({"success": false, "error": message}));
    }
    fn warn(&self, message: &str) {
        eprintln!("{}", json!({"level": "warning", "message": message}));
    }
    fn info(&self, _message: &str) {}
    fn print_json(&self, value: &Value) {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn OutputFormatter + Send> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Human => Box::new(HumanFormatter),
    }
}

// ============================================================================
// Shared renderings
// ============================================================================

/// `"1 item"` / `"3 items"`
pub fn plural(count: u64, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// Record payload plus its sync metadata
pub fn record_json(record: &LocalRecord) -> Value {
    json!({
        "id": record.id.as_str(),
        "temp_id": record.temp_id.as_ref().map(|id| id.as_str()),
        "entity": record.entity.name(),
        "sync_status": record.sync_status.as_str(),
        "is_deleted": record.is_deleted,
        "last_modified": record.last_modified.to_rfc3339(),
        "data": record.data,
    })
}

/// One line per record: id, status and the payload
pub fn record_line(record: &LocalRecord) -> String {
    let mut line = format!("{} [{}]", record.id, record.sync_status);
    if record.is_deleted {
        line.push_str(" (deleted)");
    }
    let fields: Vec<String> = record
        .data
        .iter()
        .filter(|(field, _)| field.as_str() != "id")
        .map(|(field, value)| match value {
            Value::String(s) => format!("{}={}", field, s),
            other => format!("{}={}", field, other),
        })
        .collect();
    if !fields.is_empty() {
        line.push_str("  ");
        line.push_str(&fields.join(" "));
    }
    line
}

pub fn report_json(report: &SyncReport) -> Value {
    json!({
        "push": report.push,
        "pull": report.pull,
        "pull_error": report.pull_error,
        "remaining": report.remaining,
        "duration_ms": report.duration_ms(),
    })
}

pub fn format_duration_ms(ms: i64) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

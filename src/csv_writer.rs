//! Append-only CSV sink.
//!
//! The row format is deliberately not RFC 4180: numbers are rendered with
//! C's `%.15e` for doubles and plain decimal for longs, and only strings
//! are quoted (always, doubling interior quotes). A header row is written
//! exactly once, the first time the target file doesn't already exist.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Local};

use crate::value::Value;

pub struct CsvWriterConfig {
    pub path: String,
    pub field_delimiter: String,
    pub time_format: String,
    pub time_header: String,
}

impl CsvWriterConfig {
    pub fn new(path: String) -> Self {
        Self {
            path,
            field_delimiter: ";".to_string(),
            time_format: "%Y-%m-%d %H:%M:%S".to_string(),
            time_header: "Current Time/Date".to_string(),
        }
    }
}

pub struct CsvWriter {
    file: std::fs::File,
    delimiter: String,
    time_format: String,
}

impl CsvWriter {
    /// Opens (creating if necessary) the target file in append mode,
    /// writing the header row first iff the file didn't already exist.
    pub fn open(cfg: &CsvWriterConfig, titles: &[String]) -> io::Result<Self> {
        let existed = Path::new(&cfg.path).exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&cfg.path)?;

        if !existed {
            let mut header = cfg.time_header.clone();
            for title in titles {
                header.push_str(&cfg.field_delimiter);
                header.push_str(title);
            }
            header.push('\n');
            file.write_all(header.as_bytes())?;
        }

        Ok(Self {
            file,
            delimiter: cfg.field_delimiter.clone(),
            time_format: cfg.time_format.clone(),
        })
    }

    pub fn append_row(&mut self, timestamp: DateTime<Local>, values: &[Value]) -> io::Result<()> {
        let mut row = timestamp.format(&self.time_format).to_string();
        for v in values {
            row.push_str(&self.delimiter);
            row.push_str(&render(v));
        }
        row.push('\n');
        self.file.write_all(row.as_bytes())
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Long(n) => n.to_string(),
        Value::Double(d) => format_scientific(*d),
        Value::String(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        Value::Error(e) => {
            log::debug!("rendering channel error {e} as NaN");
            "NaN".to_string()
        }
    }
}

/// Renders `d` the way C's `printf("%.15e", d)` would: a signed mantissa
/// with 15 fractional digits, then a signed, at-least-two-digit exponent.
fn format_scientific(d: f64) -> String {
    let rust_form = format!("{d:.15e}");
    let (mantissa, exp) = rust_form
        .split_once('e')
        .expect("Rust's exponential formatting always contains 'e'");
    let exp_val: i32 = exp.parse().expect("exponent is a valid integer");
    format!("{mantissa}e{exp_val:+03}")
}

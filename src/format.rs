//! Output formatting for the `campus` binary.
//!
//! Everything the CLI prints goes through [`Formattable`], rendered either as
//! JSON or CSV.

use csv::Writer;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use strum::EnumIter;

use crate::model::{AuthState, NormalizedResponse, OfflineQueueEntry, ProgramContext};
use crate::offline_queue::ReplayReport;

pub const JSON: &str = "json";
pub const CSV: &str = "csv";

/// Error types that can occur during formatting operations
#[derive(Debug, thiserror::Error)]
pub enum FormattingError {
    /// Error when an unsupported output format is requested
    #[error("invalid output format {0}")]
    UnsupportedOutputFormat(String),
    /// Error specific to CSV operations
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    /// Error when converting bytes to UTF-8 string
    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("JSON serialization error: {0}")]
    JsonSerializationError(#[from] serde_json::Error),

    #[error("CSV writer into inner error: {0}")]
    CsvIntoInnerError(#[from] csv::IntoInnerError<csv::Writer<Vec<u8>>>),
}

#[derive(Debug, Clone, Default, PartialEq, PartialOrd)]
pub struct OutputFormatOptions {
    pub with_headers: bool,
    pub pretty: bool,
}

/// Enum representing the supported output formats
#[derive(Debug, Clone, PartialEq, PartialOrd, EnumIter)]
pub enum OutputFormat {
    /// CSV (Comma-Separated Values) format
    Csv(OutputFormatOptions),
    /// JSON (JavaScript Object Notation) format
    Json(OutputFormatOptions),
}

impl OutputFormat {
    /// Returns a vector of all supported format names as strings
    pub fn names() -> Vec<&'static str> {
        vec![JSON, CSV]
    }

    pub fn from_string_with_options(
        format_str: &str,
        options: OutputFormatOptions,
    ) -> Result<OutputFormat, FormattingError> {
        let normalized_format = format_str.to_lowercase();
        match normalized_format.as_str() {
            JSON => Ok(OutputFormat::Json(options)),
            CSV => Ok(OutputFormat::Csv(options)),
            _ => Err(FormattingError::UnsupportedOutputFormat(normalized_format)),
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Json(OutputFormatOptions::default())
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OutputFormat::Csv(_) => write!(f, "csv"),
            OutputFormat::Json(_) => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = FormattingError;

    fn from_str(format_str: &str) -> Result<OutputFormat, FormattingError> {
        Self::from_string_with_options(format_str, OutputFormatOptions::default())
    }
}

pub trait Formattable {
    fn format(&self, f: &OutputFormat) -> Result<String, FormattingError>;
}

fn to_json<T: Serialize + ?Sized>(value: &T, options: &OutputFormatOptions) -> Result<String, FormattingError> {
    if options.pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

/// Write `records` as CSV, with `header` first when requested.
fn to_csv(
    header: &[String],
    records: Vec<Vec<String>>,
    options: &OutputFormatOptions,
) -> Result<String, FormattingError> {
    let mut wtr = Writer::from_writer(vec![]);
    if options.with_headers {
        wtr.write_record(header)?;
    }
    for record in records {
        wtr.write_record(&record)?;
    }
    Ok(String::from_utf8(wtr.into_inner()?)?)
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cell_opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Columns are the keys of the first object, upper-cased in the header.
fn value_table(data: &Value) -> (Vec<String>, Vec<Vec<String>>) {
    let rows: Vec<&Value> = match data {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    };
    let columns: Vec<String> = match rows.first() {
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        Some(_) => vec!["value".to_string()],
        None => Vec::new(),
    };

    let records = rows
        .iter()
        .map(|row| match row {
            Value::Object(map) => columns
                .iter()
                .map(|column| map.get(column).map(cell).unwrap_or_default())
                .collect(),
            other => vec![cell(other)],
        })
        .collect();
    let header = columns.iter().map(|c| c.to_uppercase()).collect();
    (header, records)
}

impl Formattable for NormalizedResponse<Value> {
    fn format(&self, f: &OutputFormat) -> Result<String, FormattingError> {
        match f {
            OutputFormat::Json(options) => to_json(self, options),
            OutputFormat::Csv(options) => {
                let (header, records) = value_table(self.data.as_ref().unwrap_or(&Value::Null));
                to_csv(&header, records, options)
            }
        }
    }
}

impl Formattable for AuthState {
    fn format(&self, f: &OutputFormat) -> Result<String, FormattingError> {
        // token values are never printed
        let summary = serde_json::json!({
            "authenticated": self.access_token.is_some(),
            "refreshable": self.refresh_token.is_some(),
            "expiresAt": self.expires_at,
        });
        match f {
            OutputFormat::Json(options) => to_json(&summary, options),
            OutputFormat::Csv(options) => to_csv(
                &["AUTHENTICATED".into(), "REFRESHABLE".into(), "EXPIRES_AT".into()],
                vec![vec![
                    self.access_token.is_some().to_string(),
                    self.refresh_token.is_some().to_string(),
                    self.expires_at.map(|at| at.to_rfc3339()).unwrap_or_default(),
                ]],
                options,
            ),
        }
    }
}

impl Formattable for ProgramContext {
    fn format(&self, f: &OutputFormat) -> Result<String, FormattingError> {
        match f {
            OutputFormat::Json(options) => to_json(self, options),
            OutputFormat::Csv(options) => to_csv(
                &["PROGRAM_ID".into(), "PROGRAM_NAME".into(), "PERMISSIONS".into()],
                vec![vec![
                    self.program_id.clone(),
                    self.program_name.clone(),
                    self.permissions.join(";"),
                ]],
                options,
            ),
        }
    }
}

impl Formattable for Vec<OfflineQueueEntry> {
    fn format(&self, f: &OutputFormat) -> Result<String, FormattingError> {
        match f {
            OutputFormat::Json(options) => to_json(self, options),
            OutputFormat::Csv(options) => to_csv(
                &[
                    "ID".into(),
                    "METHOD".into(),
                    "URL".into(),
                    "ENQUEUED_AT".into(),
                    "RETRY_COUNT".into(),
                ],
                self.iter()
                    .map(|entry| {
                        vec![
                            entry.id.to_string(),
                            entry.method.clone(),
                            entry.url.clone(),
                            entry.enqueued_at.to_rfc3339(),
                            entry.retry_count.to_string(),
                        ]
                    })
                    .collect(),
                options,
            ),
        }
    }
}

impl Formattable for Vec<ReplayReport> {
    fn format(&self, f: &OutputFormat) -> Result<String, FormattingError> {
        match f {
            OutputFormat::Json(options) => to_json(self, options),
            OutputFormat::Csv(options) => to_csv(
                &[
                    "ID".into(),
                    "METHOD".into(),
                    "URL".into(),
                    "STATE".into(),
                    "ERROR".into(),
                ],
                self.iter()
                    .map(|report| {
                        vec![
                            report.id.to_string(),
                            report.method.clone(),
                            report.url.clone(),
                            format!("{:?}", report.state),
                            cell_opt(&report.error.as_ref().map(|e| e.code)),
                        ]
                    })
                    .collect(),
                options,
            ),
        }
    }
}

//! Bulk loader for the historical results CSV
//!
//! ```text
//! mrn,creatinine_date_0,creatinine_result_0,creatinine_date_1,creatinine_result_1,...
//! 822825,2024-01-01 06:12:00,68.58,2024-01-03 06:40:00,70.58,,
//! ```
//!
//! Rows are ragged in practice; trailing empty pairs are dropped.

use super::store::PatientStore;
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y%m%d%H%M%S"];

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("line {line}: missing MRN")]
    MissingMrn { line: u64 },

    #[error("line {line}: invalid date '{value}'")]
    InvalidDate { line: u64, value: String },

    #[error("line {line}: invalid result '{value}'")]
    InvalidResult { line: u64, value: String },
}

pub struct CsvHistoryLoader {
    path: PathBuf,
}

impl CsvHistoryLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Append every historical result to `store`, returning how many were
    /// loaded. Results are appended in file order, which is chronological.
    pub fn load_into(&self, store: &mut PatientStore) -> Result<usize, HistoryError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let mut loaded = 0;
        for record in reader.records() {
            let record = record?;
            loaded += load_row(&record, store)?;
        }
        Ok(loaded)
    }
}

fn load_row(record: &StringRecord, store: &mut PatientStore) -> Result<usize, HistoryError> {
    let line = record.position().map(|p| p.line()).unwrap_or(0);

    let mrn = match record.get(0) {
        Some(mrn) if !mrn.is_empty() => mrn,
        _ => return Err(HistoryError::MissingMrn { line }),
    };

    let cells: Vec<&str> = record.iter().skip(1).collect();
    let mut loaded = 0;

    for pair in cells.chunks(2) {
        let (date, result) = match pair {
            [date, result] => (*date, *result),
            [date] => (*date, ""),
            _ => continue,
        };
        if date.is_empty() || result.is_empty() {
            continue;
        }

        let time = parse_date(date).ok_or_else(|| HistoryError::InvalidDate {
            line,
            value: date.to_string(),
        })?;
        // NaN is the missing-slot sentinel; non-finite values do not survive a snapshot
        let value = result
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| HistoryError::InvalidResult {
                line,
                value: result.to_string(),
            })?;

        store.append_observation(mrn, time, value);
        loaded += 1;
    }

    Ok(loaded)
}

fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

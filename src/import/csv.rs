use chrono::{Local, NaiveDate};
use csv::{ReaderBuilder, Trim};
use std::path::Path;
use tracing::{debug, trace};

use super::{has_extension, read_source, ImportFormat, ImportedSession};
use crate::error::ImportError;
use crate::models::HeartRateSample;

const FORMAT: &str = "CSV";

/// Heart-rate CSV: a header row, then `seconds_from_start, bpm` rows
/// separated by `,` or `;`. The format carries no date.
pub struct CsvImporter {
    date: Option<NaiveDate>,
}

impl CsvImporter {
    /// `date` labels imported sessions; `None` means today
    pub fn new(date: Option<NaiveDate>) -> Self {
        Self { date }
    }

    fn session_date(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Parse CSV content into samples. Either `,` or `;` separates fields,
    /// line by line, so mixed files are read whole. Rows without an integer
    /// second and a positive integer bpm are skipped.
    pub fn parse_samples(content: &str) -> Result<Vec<HeartRateSample>, ImportError> {
        let normalized = content.replace(';', ",");
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(normalized.as_bytes());

        let mut samples = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|e| ImportError::parse(FORMAT, e.to_string()))?;

            let (Some(seconds), Some(bpm)) = (record.get(0), record.get(1)) else {
                trace!(row, "Skipping short row");
                continue;
            };
            let (Ok(seconds), Ok(bpm)) = (seconds.parse::<i64>(), bpm.parse::<u16>()) else {
                trace!(row, "Skipping non-numeric row");
                continue;
            };
            if bpm == 0 {
                trace!(row, "Skipping zero heart rate");
                continue;
            }
            let Some(timestamp) = seconds.checked_mul(1000) else {
                trace!(row, seconds, "Skipping out-of-range offset");
                continue;
            };

            samples.push(HeartRateSample::new(timestamp, bpm));
        }

        Ok(samples)
    }

    pub fn parse_str(&self, content: &str) -> Result<ImportedSession, ImportError> {
        let samples = Self::parse_samples(content)?;
        let date = self.session_date();
        debug!(%date, samples = samples.len(), "Parsed CSV session");

        Ok(ImportedSession {
            date,
            start_time_ms: None,
            samples,
        })
    }
}

impl ImportFormat for CsvImporter {
    fn can_import(&self, file_path: &Path) -> bool {
        has_extension(file_path, "csv")
    }

    fn import_file(&self, file_path: &Path) -> Result<ImportedSession, ImportError> {
        self.parse_str(&read_source(file_path)?)
    }

    fn get_format_name(&self) -> &'static str {
        FORMAT
    }
}

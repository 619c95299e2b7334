//! Polar Flow training-session export (JSON).
//!
//! `startTime` is a local timestamp without zone. Heart rate lives under the
//! first exercise's `samples.heartRate` (or `samples.heart_rate`) in one of
//! the layouts in [`HeartRateSchema`].

use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

use super::{has_extension, read_source, ImportFormat, ImportedSession};
use crate::error::ImportError;
use crate::models::HeartRateSample;

const FORMAT: &str = "Polar JSON";
const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Raw `timestamp_ms` values below this are offsets from the session start;
/// anything else is absolute epoch milliseconds.
pub const OFFSET_THRESHOLD_MS: i64 = 1_000_000_000_000;

const HEART_RATE_KEYS: [&str; 2] = ["heartRate", "heart_rate"];

/// Known layouts of the heart-rate node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartRateSchema {
    /// `[{ "dateTime": "...", "value": 120 }, ...]`
    DateTimeArray,
    /// `{ "samples": [{ "timestamp_ms": 0, "value": 120 }, ...] }`
    OffsetSamples,
}

impl HeartRateSchema {
    pub fn detect(node: &Value) -> Option<Self> {
        match node {
            Value::Array(_) => Some(HeartRateSchema::DateTimeArray),
            Value::Object(obj) if obj.get("samples").map_or(false, Value::is_array) => {
                Some(HeartRateSchema::OffsetSamples)
            }
            _ => None,
        }
    }
}

/// Polar JSON importer
pub struct PolarJsonImporter;

impl PolarJsonImporter {
    pub fn new() -> Self {
        Self
    }

    /// Parse an export document
    pub fn parse_str(&self, json: &str) -> Result<ImportedSession, ImportError> {
        let root: Value =
            serde_json::from_str(json).map_err(|e| ImportError::parse(FORMAT, e.to_string()))?;

        let start_time = root
            .get("startTime")
            .and_then(Value::as_str)
            .ok_or_else(|| ImportError::MissingField {
                field: "startTime".to_string(),
            })?;
        let start = parse_local_date_time(start_time)?;
        let date = date_prefix(start_time)?;

        let first_exercise = root
            .get("exercises")
            .and_then(Value::as_array)
            .and_then(|exercises| exercises.first());

        let samples = match first_exercise {
            Some(exercise) => exercise_samples(exercise, start)?,
            None => Vec::new(),
        };

        debug!(%date, samples = samples.len(), "Parsed Polar session");
        Ok(ImportedSession {
            date,
            start_time_ms: Some(start),
            samples,
        })
    }
}

impl Default for PolarJsonImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportFormat for PolarJsonImporter {
    fn can_import(&self, file_path: &Path) -> bool {
        has_extension(file_path, "json")
    }

    fn import_file(&self, file_path: &Path) -> Result<ImportedSession, ImportError> {
        self.parse_str(&read_source(file_path)?)
    }

    fn get_format_name(&self) -> &'static str {
        FORMAT
    }
}

/// The calendar date is the first ten characters of `startTime`
fn date_prefix(start_time: &str) -> Result<NaiveDate, ImportError> {
    start_time
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        .ok_or_else(|| ImportError::parse(FORMAT, format!("invalid startTime {}", start_time)))
}

/// Local wall-clock time to epoch milliseconds
fn parse_local_date_time(value: &str) -> Result<i64, ImportError> {
    let naive = NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT)
        .map_err(|e| ImportError::parse(FORMAT, format!("invalid timestamp {}: {}", value, e)))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| ImportError::parse(FORMAT, format!("nonexistent local time {}", value)))
}

fn exercise_samples(exercise: &Value, start: i64) -> Result<Vec<HeartRateSample>, ImportError> {
    let Some(samples) = exercise.get("samples").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    for key in HEART_RATE_KEYS {
        let Some(node) = samples.get(key) else {
            continue;
        };

        return match HeartRateSchema::detect(node) {
            Some(HeartRateSchema::DateTimeArray) => date_time_samples(node),
            Some(HeartRateSchema::OffsetSamples) => offset_samples(node, start),
            None => Err(ImportError::UnrecognizedSchema {
                reason: format!("samples.{} is neither an array nor a sample object", key),
            }),
        };
    }

    Ok(Vec::new())
}

fn entries(node: &Value) -> impl Iterator<Item = &Map<String, Value>> {
    node.as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .filter(|entry| entry.contains_key("value"))
}

fn heart_rate_value(entry: &Map<String, Value>) -> Result<u16, ImportError> {
    entry
        .get("value")
        .and_then(Value::as_u64)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| ImportError::parse(FORMAT, format!("invalid heart rate {:?}", entry.get("value"))))
}

fn date_time_samples(node: &Value) -> Result<Vec<HeartRateSample>, ImportError> {
    let mut out = Vec::new();

    for entry in entries(node) {
        let heart_rate = heart_rate_value(entry)?;
        if heart_rate == 0 {
            continue;
        }
        let date_time = entry
            .get("dateTime")
            .and_then(Value::as_str)
            .ok_or_else(|| ImportError::MissingField {
                field: "dateTime".to_string(),
            })?;
        out.push(HeartRateSample::new(parse_local_date_time(date_time)?, heart_rate));
    }

    Ok(out)
}

fn offset_samples(node: &Value, start: i64) -> Result<Vec<HeartRateSample>, ImportError> {
    let samples = node.get("samples").unwrap_or(&Value::Null);
    let mut out = Vec::new();

    for entry in entries(samples) {
        let raw = match entry.get("timestamp_ms") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        let Some(raw) = raw else {
            continue;
        };
        let heart_rate = heart_rate_value(entry)?;
        if heart_rate == 0 {
            continue;
        }

        out.push(HeartRateSample::new(resolve_timestamp(raw, start), heart_rate));
    }

    Ok(out)
}

/// Small raw values are offsets from `start`, large ones absolute epoch ms
pub fn resolve_timestamp(raw: i64, start: i64) -> i64 {
    if raw < OFFSET_THRESHOLD_MS {
        start.saturating_add(raw)
    } else {
        raw
    }
}

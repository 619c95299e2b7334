//! Import adapters through the file-based `ImportManager` API.

use chrono::{Local, NaiveDate, TimeZone};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use recoverysense::error::ImportError;
use recoverysense::import::polar_json::{resolve_timestamp, OFFSET_THRESHOLD_MS};
use recoverysense::import::ImportManager;
use recoverysense::models::HeartRateSample;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn local_ms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
    Local
        .with_ymd_and_hms(y, mo, d, h, mi, s)
        .earliest()
        .unwrap()
        .timestamp_millis()
}

#[test]
fn test_polar_export_with_date_time_samples() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "training-session-2024-06-10.json",
        r#"{
            "exportVersion": "1.6",
            "startTime": "2024-06-10T18:30:00.000",
            "stopTime": "2024-06-10T18:32:00.000",
            "exercises": [
                {
                    "sport": "RUNNING",
                    "samples": {
                        "heartRate": [
                            {"dateTime": "2024-06-10T18:30:00.000", "value": 110},
                            {"dateTime": "2024-06-10T18:31:00.000", "value": 130},
                            {"dateTime": "2024-06-10T18:32:00.000", "value": 150}
                        ]
                    }
                },
                {
                    "sport": "OTHER",
                    "samples": {"heartRate": [{"dateTime": "2024-06-10T19:00:00.000", "value": 99}]}
                }
            ]
        }"#,
    );

    let session = ImportManager::new().import_file(&path).unwrap();
    assert_eq!(session.date, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
    assert_eq!(session.start_time_ms, Some(local_ms(2024, 6, 10, 18, 30, 0)));
    // Only the first exercise is read
    assert_eq!(session.samples.len(), 3);
    assert_eq!(
        session.samples[2],
        HeartRateSample::new(local_ms(2024, 6, 10, 18, 32, 0), 150)
    );

    let day = session.into_training_day();
    assert_eq!(day.duration_minutes(), 2.0);
    assert_eq!(day.training_score(), Some(2.0 * 1.3));
}

#[test]
fn test_polar_export_with_offset_samples() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "offsets.json",
        r#"{
            "startTime": "2024-06-11T06:00:00.000",
            "exercises": [{"samples": {"heart_rate": {"samples": [
                {"timestamp_ms": "0", "value": 100},
                {"timestamp_ms": 30000, "value": 104}
            ]}}}]
        }"#,
    );

    let session = ImportManager::new().import_file(&path).unwrap();
    let start = local_ms(2024, 6, 11, 6, 0, 0);
    assert_eq!(
        session.samples,
        vec![
            HeartRateSample::new(start, 100),
            HeartRateSample::new(start + 30_000, 104)
        ]
    );
}

/// Raw timestamps are interpreted by magnitude alone: below 10^12 ms they are
/// offsets, at or above they are absolute. An absolute timestamp before
/// 2001-09-09 would therefore be misread as an offset.
#[test]
fn test_timestamp_magnitude_heuristic() {
    let start = local_ms(2024, 6, 11, 6, 0, 0);

    assert_eq!(resolve_timestamp(0, start), start);
    assert_eq!(resolve_timestamp(OFFSET_THRESHOLD_MS - 1, start), start + OFFSET_THRESHOLD_MS - 1);
    assert_eq!(resolve_timestamp(OFFSET_THRESHOLD_MS, start), OFFSET_THRESHOLD_MS);

    // An old absolute epoch value is treated as an offset
    let year_2000 = 946_684_800_000;
    assert_eq!(resolve_timestamp(year_2000, start), start + year_2000);
}

#[test]
fn test_unknown_heart_rate_layout() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "weird.json",
        r#"{
            "startTime": "2024-06-11T06:00:00.000",
            "exercises": [{"samples": {"heartRate": "not available"}}]
        }"#,
    );

    let err = ImportManager::new().import_file(&path).unwrap_err();
    assert!(matches!(err, ImportError::UnrecognizedSchema { .. }));
}

#[test]
fn test_malformed_json() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "broken.json", "{\"startTime\": ");
    let err = ImportManager::new().import_file(&path).unwrap_err();
    assert!(matches!(err, ImportError::Parse { .. }));
}

#[test]
fn test_csv_export() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "hr.csv",
        "Time (s),HR (bpm)\n0,90\n\n60,100\n120,n/a\n180,110\n",
    );
    let date = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();

    let session = ImportManager::with_csv_date(Some(date))
        .import_file(&path)
        .unwrap();
    assert_eq!(session.date, date);
    assert_eq!(
        session.samples,
        vec![
            HeartRateSample::new(0, 90),
            HeartRateSample::new(60_000, 100),
            HeartRateSample::new(180_000, 110),
        ]
    );
}

#[test]
fn test_missing_file() {
    let err = ImportManager::new()
        .import_file(std::path::Path::new("/no/such/session.json"))
        .unwrap_err();
    assert!(matches!(err, ImportError::Io { .. }));
}

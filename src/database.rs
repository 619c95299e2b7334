use chrono::{Local, NaiveDate, TimeZone};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{HeartRateSample, TrainingDay};

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Compression error: {0}")]
    CompressionError(#[from] std::io::Error),
    #[error("Data not found: {0}")]
    NotFound(String),
    #[error("Timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}

/// Where a stored session came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    Live,
    Import,
}

impl SessionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionSource::Live => "live",
            SessionSource::Import => "import",
        }
    }
}

/// Heart-rate samples as a gzip-compressed bincode blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedSamples {
    pub compressed_data: Vec<u8>,
    pub original_size: usize,
    pub point_count: usize,
}

impl CompressedSamples {
    pub fn compress(samples: &[HeartRateSample]) -> Result<Self, DatabaseError> {
        let serialized = bincode::serialize(samples)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;
        let original_size = serialized.len();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serialized)?;
        let compressed_data = encoder.finish()?;

        Ok(Self {
            compressed_data,
            original_size,
            point_count: samples.len(),
        })
    }

    pub fn decompress(&self) -> Result<Vec<HeartRateSample>, DatabaseError> {
        let mut decoder = GzDecoder::new(self.compressed_data.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;

        bincode::deserialize(&decompressed)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))
    }

    /// Original size / compressed size
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_data.is_empty() {
            return 0.0;
        }
        self.original_size as f64 / self.compressed_data.len() as f64
    }
}

/// A session as written
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSession {
    pub id: String,
    pub day: TrainingDay,
}

/// Persistence contract the session controller depends on
pub trait SessionStore: Send {
    /// Store a live recording. The calendar date is the local date of
    /// `start_time_ms`; score and risk are computed from the samples.
    fn save_session(
        &mut self,
        samples: &[HeartRateSample],
        start_time_ms: i64,
    ) -> Result<SavedSession, DatabaseError>;

    /// Every stored session, oldest date first, then in insertion order
    fn get_all_sessions(&self) -> Result<Vec<TrainingDay>, DatabaseError>;
}

/// Local calendar date of an epoch-millisecond instant
pub fn local_date(timestamp_ms: i64) -> Result<NaiveDate, DatabaseError> {
    Local
        .timestamp_millis_opt(timestamp_ms)
        .earliest()
        .map(|dt| dt.date_naive())
        .ok_or(DatabaseError::InvalidTimestamp(timestamp_ms))
}

/// SQLite-backed session store
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create or open a database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(db_path)?;
        let mut db = Self { conn };
        db.init_schema(true)?;
        Ok(db)
    }

    /// Private database that lives as long as the handle
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.init_schema(false)?;
        Ok(db)
    }

    fn init_schema(&mut self, on_disk: bool) -> Result<(), DatabaseError> {
        if on_disk {
            // journal_mode returns a row, so it cannot go through execute()
            self.conn
                .query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
            self.conn.execute("PRAGMA synchronous=NORMAL", [])?;
        }
        self.conn.execute("PRAGMA foreign_keys=ON", [])?;

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS training_sessions (
                id TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                start_time_ms INTEGER,
                training_score REAL,
                risk_level TEXT,
                source TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS session_samples (
                session_id TEXT PRIMARY KEY,
                compressed_data BLOB NOT NULL,
                point_count INTEGER NOT NULL,
                original_size INTEGER NOT NULL,

                FOREIGN KEY (session_id) REFERENCES training_sessions (id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_training_sessions_date ON training_sessions (date);
            "#,
        )?;

        Ok(())
    }

    /// Store a normalized day, e.g. from an import adapter
    pub fn save_day(
        &mut self,
        day: &TrainingDay,
        source: SessionSource,
        start_time_ms: Option<i64>,
    ) -> Result<SavedSession, DatabaseError> {
        // Score and risk are always derived from the samples
        let day = TrainingDay::new(day.date(), day.samples().to_vec());
        let id = Uuid::new_v4().to_string();
        let compressed = CompressedSamples::compress(day.samples())?;

        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO training_sessions (
                id, date, start_time_ms, training_score, risk_level, source
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                id,
                day.date().to_string(),
                start_time_ms,
                day.training_score(),
                day.risk_level().map(|r| r.as_str()),
                source.as_str(),
            ],
        )?;
        tx.execute(
            r#"
            INSERT INTO session_samples (
                session_id, compressed_data, point_count, original_size
            ) VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                id,
                compressed.compressed_data,
                compressed.point_count as i64,
                compressed.original_size as i64,
            ],
        )?;
        tx.commit()?;

        info!(
            session = %id,
            date = %day.date(),
            samples = compressed.point_count,
            score = day.training_score().unwrap_or_default(),
            "Saved training session"
        );

        Ok(SavedSession { id, day })
    }

    /// Load one session by id
    pub fn load_session(&self, id: &str) -> Result<TrainingDay, DatabaseError> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT s.date, d.compressed_data, d.point_count, d.original_size
                FROM training_sessions s
                JOIN session_samples d ON d.session_id = s.id
                WHERE s.id = ?1
                "#,
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound(format!("session {}", id)))?;

        day_from_row(row)
    }

    pub fn session_count(&self) -> Result<usize, DatabaseError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM training_sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats, DatabaseError> {
        let session_count = self.session_count()?;
        let (total_original_size, total_compressed_size, total_samples): (i64, i64, i64) =
            self.conn.query_row(
                r#"
                SELECT COALESCE(SUM(original_size), 0),
                       COALESCE(SUM(LENGTH(compressed_data)), 0),
                       COALESCE(SUM(point_count), 0)
                FROM session_samples
                "#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        let compression_ratio = if total_compressed_size > 0 {
            total_original_size as f64 / total_compressed_size as f64
        } else {
            0.0
        };

        Ok(DatabaseStats {
            session_count,
            sample_count: total_samples as usize,
            total_original_size: total_original_size as usize,
            total_compressed_size: total_compressed_size as usize,
            compression_ratio,
        })
    }
}

fn day_from_row(
    (date, compressed_data, point_count, original_size): (String, Vec<u8>, i64, i64),
) -> Result<TrainingDay, DatabaseError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| DatabaseError::SerializationError(format!("bad date {}: {}", date, e)))?;
    let samples = CompressedSamples {
        compressed_data,
        original_size: original_size as usize,
        point_count: point_count as usize,
    }
    .decompress()?;

    Ok(TrainingDay::new(date, samples))
}

impl SessionStore for Database {
    fn save_session(
        &mut self,
        samples: &[HeartRateSample],
        start_time_ms: i64,
    ) -> Result<SavedSession, DatabaseError> {
        let date = local_date(start_time_ms)?;
        let day = TrainingDay::new(date, samples.to_vec());
        self.save_day(&day, SessionSource::Live, Some(start_time_ms))
    }

    fn get_all_sessions(&self) -> Result<Vec<TrainingDay>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT s.date, d.compressed_data, d.point_count, d.original_size
            FROM training_sessions s
            JOIN session_samples d ON d.session_id = s.id
            ORDER BY s.date ASC, s.rowid ASC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut days = Vec::new();
        for row in rows {
            days.push(day_from_row(row?)?);
        }
        debug!(sessions = days.len(), "Loaded training history");
        Ok(days)
    }
}

/// Storage statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub session_count: usize,
    pub sample_count: usize,
    pub total_original_size: usize,
    pub total_compressed_size: usize,
    pub compression_ratio: f64,
}

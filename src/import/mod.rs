use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::ImportError;
use crate::models::{HeartRateSample, TrainingDay};

pub mod csv;
pub mod polar_json;

/// A workout file normalized to one day of heart-rate samples
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedSession {
    pub date: NaiveDate,
    /// Session start in epoch milliseconds, when the source carries one
    pub start_time_ms: Option<i64>,
    pub samples: Vec<HeartRateSample>,
}

impl ImportedSession {
    pub fn into_training_day(self) -> TrainingDay {
        TrainingDay::new(self.date, self.samples)
    }
}

/// Trait for importing heart-rate data from different file formats
pub trait ImportFormat {
    /// Check if this importer can handle the given file
    fn can_import(&self, file_path: &Path) -> bool;

    /// Import the session stored in the file
    fn import_file(&self, file_path: &Path) -> Result<ImportedSession, ImportError>;

    /// Get the format name for this importer
    fn get_format_name(&self) -> &'static str;
}

pub(crate) fn has_extension(file_path: &Path, extension: &str) -> bool {
    file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

pub(crate) fn read_source(file_path: &Path) -> Result<String, ImportError> {
    std::fs::read_to_string(file_path).map_err(|source| ImportError::Io {
        path: file_path.to_path_buf(),
        source,
    })
}

/// Outcome of importing a directory
#[derive(Debug, Default)]
pub struct DirectoryImport {
    pub sessions: Vec<(PathBuf, ImportedSession)>,
    pub failures: Vec<(PathBuf, ImportError)>,
}

/// Manager for coordinating different import formats
pub struct ImportManager {
    importers: Vec<Box<dyn ImportFormat>>,
    show_progress: bool,
}

impl ImportManager {
    /// All importers; CSV files are dated today
    pub fn new() -> Self {
        Self::with_csv_date(None)
    }

    /// All importers, with an explicit date for formats that carry none
    pub fn with_csv_date(date: Option<NaiveDate>) -> Self {
        let importers: Vec<Box<dyn ImportFormat>> = vec![
            Box::new(polar_json::PolarJsonImporter::new()),
            Box::new(csv::CsvImporter::new(date)),
        ];

        Self {
            importers,
            show_progress: true,
        }
    }

    /// Disable the progress bar for directory imports
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    fn importer_for(&self, file_path: &Path) -> Option<&dyn ImportFormat> {
        self.importers
            .iter()
            .find(|importer| importer.can_import(file_path))
            .map(|importer| importer.as_ref())
    }

    /// Import a single file, auto-detecting the format
    pub fn import_file(&self, file_path: &Path) -> Result<ImportedSession, ImportError> {
        let importer = self
            .importer_for(file_path)
            .ok_or_else(|| ImportError::UnsupportedFormat {
                path: file_path.to_path_buf(),
            })?;

        info!(
            file = %file_path.display(),
            format = importer.get_format_name(),
            "Importing workout"
        );
        importer.import_file(file_path)
    }

    /// Import every supported file in a directory. Per-file failures are
    /// collected, not propagated.
    pub fn import_directory(&self, dir_path: &Path) -> Result<DirectoryImport, ImportError> {
        let files = self.collect_importable_files(dir_path)?;
        let mut outcome = DirectoryImport::default();

        if files.is_empty() {
            info!(dir = %dir_path.display(), "No importable files found");
            return Ok(outcome);
        }

        let pb = if self.show_progress {
            ProgressBar::new(files.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({msg})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        for file_path in files {
            let name = file_path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
            pb.set_message(format!("Processing {}", name));

            match self.import_file(&file_path) {
                Ok(session) => {
                    pb.println(format!(
                        "✓ Imported {} samples from {}",
                        session.samples.len(),
                        name
                    ));
                    outcome.sessions.push((file_path, session));
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "Import failed");
                    pb.println(format!("✗ Failed to import {}: {}", name, e));
                    outcome.failures.push((file_path, e));
                }
            }

            pb.inc(1);
        }

        pb.finish_with_message("Import complete");
        Ok(outcome)
    }

    /// Collect all files that can be imported from a directory, sorted by name
    fn collect_importable_files(&self, dir_path: &Path) -> Result<Vec<PathBuf>, ImportError> {
        let io_error = |source| ImportError::Io {
            path: dir_path.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir_path).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.is_file() && self.can_import_file(&path) {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    pub fn can_import_file(&self, file_path: &Path) -> bool {
        self.importer_for(file_path).is_some()
    }
}

impl Default for ImportManager {
    fn default() -> Self {
        Self::new()
    }
}

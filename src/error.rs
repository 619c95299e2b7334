//! Unified error hierarchy for RecoverySense
//!
//! Link failures are recoverable and surface as `Error` connection state;
//! import and storage failures propagate to the caller. Pure scoring never
//! fails.

use std::path::PathBuf;
use thiserror::Error;

use crate::database::DatabaseError;

/// Top-level error type for all RecoverySense operations
#[derive(Debug, Error)]
pub enum RecoverySenseError {
    /// Sensor link errors
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Workout import errors
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// Database operation errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Bluetooth link failures. The `Display` text is the diagnostic shown
/// alongside the `Error` connection state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Bluetooth scan permission not granted")]
    PermissionDenied,

    #[error("Bluetooth adapter is disabled")]
    AdapterDisabled,

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Heart rate service not found")]
    ServiceNotFound,

    #[error("Heart rate measurement characteristic not found")]
    CharacteristicNotFound,

    #[error("Notification descriptor missing")]
    DescriptorMissing,

    #[error("Could not enable notifications: {0}")]
    NotificationEnableFailed(String),
}

/// Import adapter errors
#[derive(Debug, Error)]
pub enum ImportError {
    /// No importer handles this file
    #[error("Unsupported format: {path}")]
    UnsupportedFormat { path: PathBuf },

    /// The document parsed but its heart-rate data has an unknown shape
    #[error("Unrecognized schema: {reason}")]
    UnrecognizedSchema { reason: String },

    /// Format-specific parsing error
    #[error("Parse error in {format}: {reason}")]
    Parse { format: String, reason: String },

    /// Missing required data
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// Reading the source failed
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ImportError {
    pub fn parse(format: &str, reason: impl Into<String>) -> Self {
        ImportError::Parse {
            format: format.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for RecoverySense operations
pub type Result<T> = std::result::Result<T, RecoverySenseError>;

impl RecoverySenseError {
    /// Check if the caller can simply try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RecoverySenseError::Link(_) | RecoverySenseError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RecoverySenseError::Link(LinkError::PermissionDenied)
            | RecoverySenseError::Link(LinkError::AdapterDisabled) => ErrorSeverity::Warning,
            RecoverySenseError::Link(_) => ErrorSeverity::Error,
            RecoverySenseError::Import(ImportError::UnsupportedFormat { .. }) => {
                ErrorSeverity::Warning
            }
            RecoverySenseError::Import(_) => ErrorSeverity::Error,
            RecoverySenseError::Database(DatabaseError::NotFound(_)) => ErrorSeverity::Warning,
            RecoverySenseError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Emit the error through `tracing` at its severity
    pub fn log(&self) {
        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::Error => {
                tracing::error!(error = %self, retryable = self.is_retryable(), "Operation failed")
            }
            ErrorSeverity::Warning => {
                tracing::warn!(error = %self, retryable = self.is_retryable(), "Operation failed")
            }
            ErrorSeverity::Info => tracing::info!(error = %self, "Operation failed"),
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RecoverySenseError::Link(LinkError::AdapterDisabled) => {
                "Bluetooth is turned off. Enable it and scan again.".to_string()
            }
            RecoverySenseError::Link(LinkError::PermissionDenied) => {
                "Bluetooth scanning is not permitted. Grant the permission and scan again."
                    .to_string()
            }
            RecoverySenseError::Link(err) => format!("{}. Try connecting again.", err),
            RecoverySenseError::Import(ImportError::UnrecognizedSchema { .. }) => {
                "The workout file does not contain heart-rate data in a known layout.".to_string()
            }
            RecoverySenseError::Import(ImportError::UnsupportedFormat { path }) => {
                format!("Could not import {}: unsupported file type", path.display())
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}

//! Error types for Dwn Core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by the stage of a download job that produces them
//! (admission, extraction, materialization, storage) so the orchestration layer
//! can classify every terminal outcome into a short status message.
//!
//! ## Job outcome mapping
//!
//! - `Cancelled` → record PAUSED, recoverable by resume
//! - `AlreadyDownloaded`, `AlreadyInProgress` → rejected before start, no record created
//! - `ToolFailed`, `NoOutputFile`, `MaterializationFailed` → record FAILED
//! - anything raised by the metadata fetch → logged and absorbed

use thiserror::Error;

/// Result type alias using our DwnError type
pub type Result<T> = std::result::Result<T, DwnError>;

/// Main error type for Dwn Core
#[derive(Error, Debug)]
pub enum DwnError {
    // ===== Admission Errors =====

    /// Submitted URL could not be parsed or uses an unsupported scheme
    #[error("Invalid download URL: {0}")]
    InvalidDownloadUrl(String),

    /// A COMPLETED record already exists for this (url, media type)
    #[error("Already downloaded as {media_type}: {file_name}")]
    AlreadyDownloaded {
        media_type: String,
        file_name: String,
    },

    /// Another job is currently downloading the same (url, media type)
    #[error("Already downloading: {0}")]
    AlreadyInProgress(String),

    // ===== Extraction Tool Errors =====

    /// Extraction tool binary could not be started
    #[error("Extraction tool not found: {0}")]
    ToolNotFound(String),

    /// Extraction tool exited unsuccessfully
    #[error("Extraction failed: {message}")]
    ToolFailed {
        message: String,
        /// Process exit code when the tool ran to completion
        exit_code: Option<i32>,
    },

    /// Tool output could not be interpreted
    #[error("Unexpected tool output: {0}")]
    InvalidToolOutput(String),

    /// Tool returned but left no file with the expected extension
    #[error("No {0} file found")]
    NoOutputFile(String),

    /// Job was cancelled cooperatively
    #[error("Download cancelled")]
    Cancelled,

    // ===== Materialization Errors =====

    /// Library refused to reserve a pending entry
    #[error("Media library entry unavailable: {0}")]
    LibraryEntryUnavailable(String),

    /// Every materialization path failed
    #[error("Failed to save media: {0}")]
    MaterializationFailed(String),

    // ===== File System Errors =====

    /// File or directory not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// File I/O error with context
    #[error("File I/O error: {0}")]
    FileIoError(String),

    /// Invalid file path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // ===== Storage Errors =====

    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Record not found in database
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Database migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    // ===== State and Configuration =====

    /// Operation not valid for the current record or entry state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid input parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration or settings file problem
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error (bugs, unexpected states, panicked jobs)
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DwnError {
    /// Create a RecordNotFound error with a resource name
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        DwnError::RecordNotFound(resource.into())
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        DwnError::InvalidInput(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        DwnError::InternalError(message.into())
    }

    /// Create a ToolFailed error
    pub fn tool_failed<S: Into<String>>(message: S, exit_code: Option<i32>) -> Self {
        DwnError::ToolFailed {
            message: message.into(),
            exit_code,
        }
    }

    /// True when the error came from cooperative cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DwnError::Cancelled)
    }

    /// True when the submission was refused before any work started
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DwnError::AlreadyDownloaded { .. }
                | DwnError::AlreadyInProgress(_)
                | DwnError::InvalidDownloadUrl(_)
        )
    }

    /// Check if a retry of the same job could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DwnError::Cancelled
                | DwnError::ToolFailed { .. }
                | DwnError::NoOutputFile(_)
                | DwnError::MaterializationFailed(_)
                | DwnError::LibraryEntryUnavailable(_)
                | DwnError::FileIoError(_)
                | DwnError::IoError(_)
        )
    }

    /// Check if error is related to file/disk operations
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            DwnError::FileNotFound(_)
                | DwnError::FileIoError(_)
                | DwnError::InvalidPath(_)
                | DwnError::IoError(_)
        )
    }

    /// Error message cut to `limit` characters, as stored on FAILED records
    pub fn truncated(&self, limit: usize) -> String {
        truncate_message(&self.to_string(), limit)
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            DwnError::ToolNotFound(binary) => {
                format!("The download tool '{}' is not installed or not executable.", binary)
            }
            DwnError::Cancelled => "Download paused".to_string(),
            DwnError::NoOutputFile(ext) => {
                format!("The download finished but no {} file was produced.", ext)
            }
            DwnError::AlreadyDownloaded { media_type, file_name } => {
                format!("Already downloaded as {}: {}", media_type, file_name)
            }
            DwnError::AlreadyInProgress(_) => "This download is already running.".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Cut a message to at most `limit` characters on a char boundary
pub fn truncate_message(message: &str, limit: usize) -> String {
    message.chars().take(limit).collect()
}

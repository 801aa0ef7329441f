//! Error types for the GFS sampling driver

use thiserror::Error;

/// Status code returned by the C-style surface on success
pub const GFS_OK: i32 = 0;
/// Status code for a start request while a session is running
pub const E_GFS_ALREADY_RUNNING: i32 = -1;
/// Status code for an ingest buffer allocation failure
pub const E_GFS_MEM: i32 = -2;
/// Status code for every error the C-style surface does not name
pub const E_GFS_OTHER: i32 = -3;

/// Error type for driver operations
///
/// Protocol noise (bad markers, implausible lengths, trailing payload bytes,
/// ingest overflow) is handled inside the pipeline and never shows up here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GfsError {
    /// `start` called while a session is running
    #[error("Sampling session already running")]
    AlreadyRunning,

    /// Ingest buffer allocation failed
    #[error("Out of memory: could not allocate {requested} byte ingest buffer")]
    OutOfMemory { requested: usize },

    /// Requested sampling frequency is not usable
    #[error("Invalid sampling frequency: {0} Hz")]
    InvalidFrequency(u32),

    /// Consumer pass requested with no session running
    #[error("No sampling session running")]
    NotRunning,

    /// Driver called back from inside a sample sink
    #[error("Driver re-entered from within a sample sink")]
    Reentrant,

    /// Session configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Hardware sampling source failed to configure
    #[error("Sampling source error: {0}")]
    SamplingSource(String),

    /// Transport or file I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl GfsError {
    /// Numeric status code matching the `gfs_start`/`gfs_stop` surface
    pub fn code(&self) -> i32 {
        match self {
            GfsError::AlreadyRunning => E_GFS_ALREADY_RUNNING,
            GfsError::OutOfMemory { .. } => E_GFS_MEM,
            _ => E_GFS_OTHER,
        }
    }
}

impl From<std::io::Error> for GfsError {
    fn from(err: std::io::Error) -> Self {
        GfsError::Io(err.to_string())
    }
}

/// Convert a driver result into a numeric status code
pub fn status_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => GFS_OK,
        Err(e) => e.code(),
    }
}

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, GfsError>;

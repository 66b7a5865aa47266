//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides one place where every failure of the
//! acquisition workflow is named, from serial link problems to storage failures.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: the gauge could not be reached (port busy, missing, timed out).
//!   Reported to the operator, never retried automatically.
//! - **`NotConnected`**: a control command was issued on a closed channel.
//! - **`DataFormat`** / **`Parse`**: a device line or a typed value is not a number.
//!   The input is rejected and no state changes.
//! - **`Persistence`**: a write or read against the store failed. Fatal to the
//!   current submit attempt only; the measurement session survives.
//! - **`InvalidInput`**: empty parameter lists and out-of-sequence calls.
//! - **`Config`** / **`Configuration`**: figment load errors and semantic validation
//!   errors in the settings.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types,
//! which keeps `?` usable across the crate.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every failure the acquisition core can surface.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The port could not be opened or stopped answering.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Filesystem or port I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation needs an open channel.
    #[error("Device channel not connected")]
    NotConnected,

    /// A gauge line that is not a number.
    #[error("Malformed device data: {0:?}")]
    DataFormat(String),

    /// Operator input that is not a plain decimal.
    #[error("Cannot parse {input:?} as a value: {reason}")]
    Parse {
        /// Text as typed.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A store write or read failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A request the catalog refuses.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No row with the given id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Settings loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Writing an export file failed.
    #[error("Export error: {0}")]
    Export(String),

    /// The build lacks the named cargo feature.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Hardware and input errors are turned into operator messages at the
    /// component boundary; everything else propagates to the caller.
    pub fn is_operator_recoverable(&self) -> bool {
        matches!(
            self,
            DaqError::Connection(_)
                | DaqError::NotConnected
                | DaqError::DataFormat(_)
                | DaqError::Parse { .. }
                | DaqError::InvalidInput(_)
        )
    }
}

impl From<rusqlite::Error> for DaqError {
    fn from(err: rusqlite::Error) -> Self {
        DaqError::Persistence(err.to_string())
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

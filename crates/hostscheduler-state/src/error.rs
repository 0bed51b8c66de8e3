//! Error types for the hibernation record store.

use thiserror::Error;

/// Result type alias for record store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while encoding or decoding a hibernation record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("a hibernation record already exists for cluster {0}")]
    RecordExists(String),

    #[error("pool name {0:?} cannot be stored as a label key")]
    InvalidPoolName(String),

    #[error("label {key:?} is malformed: {reason}")]
    Malformed { key: String, reason: String },

    #[error("pool labels present without a hibernation timestamp")]
    MissingTimestamp,

    #[error("record has no node pools")]
    Empty,
}

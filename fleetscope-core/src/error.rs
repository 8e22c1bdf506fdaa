use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Source '{source_name}' unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },

    #[error("Partial data from '{source_name}': {message}")]
    PartialData {
        source_name: String,
        message: String,
    },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    #[error("Collection failed: {message}")]
    CollectionFailed { message: String },

    #[error("No inventory snapshot has been published yet")]
    SnapshotUnavailable,

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type FleetResult<T> = std::result::Result<T, FleetError>;

use crate::storage::models::MediaId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stored relations contradict an invariant that only the mutators in this crate
    /// maintain. Not retryable.
    #[error("Integrity fault: {0}")]
    Integrity(String),

    #[error(
        "Auto-resolution rule '{rule}' actioned pair ({smaller}, {larger}) but it is still queued"
    )]
    PairNotRemoved {
        rule: String,
        smaller: MediaId,
        larger: MediaId,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn integrity(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!("{}", msg);
        Error::Integrity(msg)
    }

    /// True for faults that indicate a bug in the invariant-preserving mutators.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Integrity(_) | Error::PairNotRemoved { .. })
    }
}

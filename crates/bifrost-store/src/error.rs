use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Snapshot {resource} is corrupt: {reason}")]
    Corrupt { resource: String, reason: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

use thiserror::Error;

/// Errors surfaced by the live-query layer.
///
/// Event application never produces these; a malformed or unknown event is
/// dropped where it is matched.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Archive fetch failed after {attempts} attempts ({url}): {message}")]
    ArchiveFetch {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Archive {blob_id} could not be parsed: {message}")]
    ArchiveParse { blob_id: String, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

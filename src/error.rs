//! Error taxonomy shared by the library.
//!
//! Every component returns [`Error`]. The HTTP layer maps each variant to a
//! status code and the CLI wraps it in `anyhow` with context.

use thiserror::Error;

/// Library-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input or invalid parameters (empty question, `top_k == 0`,
    /// overlap not smaller than the window).
    #[error("invalid input: {0}")]
    Validation(String),

    /// The uploaded file is not an accepted type.
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// Conversation or document id does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A document with the same content hash already exists.
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),

    /// Text could not be extracted from an uploaded file.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The embedding provider failed or returned a malformed vector.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The language model failed or returned nothing usable.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Conversation store, document store or vector index failure.
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl Error {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "bad_request",
            Error::UnsupportedMedia(_) => "unsupported_media_type",
            Error::NotFound(_) => "not_found",
            Error::DuplicateResource(_) => "duplicate",
            Error::Extraction(_) => "extraction_failed",
            Error::Embedding(_) => "embedding_failed",
            Error::Generation(_) => "generation_failed",
            Error::Storage(_) => "storage_error",
        }
    }
}

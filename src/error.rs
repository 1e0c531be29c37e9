// Error taxonomy shared by the store, query and preference layers.
// Fetch failures live in `fetcher::FetchError` since the importer recovers from them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A country, indicator or user-owned row does not exist (or is not visible)
    #[error("{resource} '{key}' not found")]
    NotFound { resource: &'static str, key: String },

    /// Malformed caller input (filter parameters, preference payloads, codes)
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    pub fn not_found(resource: &'static str, key: impl Into<String>) -> Self {
        Error::NotFound {
            resource,
            key: key.into(),
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

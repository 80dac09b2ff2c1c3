use std::sync::Arc;

use thiserror::Error;

/// Result type used by the fallible parts of the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned while building inputs or talking to external collaborators.
///
/// Decision operations themselves never fail: missing entities, stale stored state and invalid
/// overrides resolve to "no variation" plus a decision reason.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The datafile could not be parsed.
    #[error("error parsing datafile")]
    DatafileParseError(#[source] Arc<serde_json::Error>),

    /// The datafile declares a schema version this crate does not understand.
    #[error("unsupported datafile version {0:?}")]
    UnsupportedDatafileVersion(String),

    /// User id must be a non-empty string.
    #[error("user id must not be empty")]
    InvalidUserId,

    /// A user profile service failed to look up or save a profile.
    #[error("user profile service error: {0}")]
    UserProfileService(String),

    /// Invalid event URL.
    #[error("invalid event url")]
    InvalidUrl(#[source] url::ParseError),

    /// Server responded with a non-success status code.
    #[error("event endpoint returned status {0}")]
    HttpStatus(u16),

    /// Network error.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::DatafileParseError(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Network(Arc::new(value.without_url()))
    }
}

//! Error types for keepmd-core

use thiserror::Error;

use crate::auth::ExchangeError;
use crate::storage::StorageError;
use crate::sync::SyncError;

/// Result type alias using keepmd-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`crate::KeepClient`] operations
#[derive(Error, Debug)]
pub enum Error {
    /// The credential was rejected or no usable token came back
    #[error("{0}")]
    Authentication(String),

    /// The remote service wants an interactive browser verification step
    #[error("Browser login required.")]
    BrowserLoginRequired {
        /// Verification URL reported by the service, if any
        url: Option<String>,
    },

    /// The operation needs an authenticated session and there is none
    #[error("Not logged in.")]
    NotLoggedIn,

    /// Credential exchange transport failure
    #[error("Credential exchange failed: {0}")]
    Exchange(#[from] ExchangeError),

    /// Note sync failure
    #[error("Note sync failed: {0}")]
    Sync(SyncError),

    /// Local state write failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<SyncError> for Error {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::Authentication(message) => Self::Authentication(message),
            other => Self::Sync(other),
        }
    }
}

//! Note sync collaborator seam.

mod keep;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use keep::{KeepSyncBackend, DEFAULT_NOTES_API_URL};

use crate::auth::ExchangeError;
use crate::endpoint::EndpointError;
use crate::models::RemoteNote;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Authentication(String),
    #[error("Invalid sync endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {0}")]
    Api(String),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Credentials a sync session is opened with
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub email: String,
    pub master_token: String,
    pub device_id: String,
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionCredentials")
            .field("email", &self.email)
            .field("master_token", &"[REDACTED]")
            .field("device_id", &self.device_id)
            .finish()
    }
}

#[async_trait]
pub trait NoteSyncBackend: Send + Sync {
    /// Authenticate a fresh session. The session holds no notes until the
    /// first [`NoteSyncSession::sync`].
    async fn connect(&self, credentials: &SessionCredentials)
        -> SyncResult<Box<dyn NoteSyncSession>>;
}

#[async_trait]
pub trait NoteSyncSession: Send {
    /// Pull remote changes into the session.
    async fn sync(&mut self) -> SyncResult<()>;

    /// Every top-level note currently known to the session.
    fn notes(&self) -> Vec<RemoteNote>;
}

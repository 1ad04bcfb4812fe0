//! Keep session orchestration: login, logout, listing, and change detection.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::auth::{CredentialExchange, ExchangeResponse};
use crate::error::{Error, Result};
use crate::models::{compare_notes, CompareResult, NoteSummary};
use crate::storage::{BridgeStorage, StorageError, TokenStorage};
use crate::sync::{NoteSyncBackend, NoteSyncSession, SessionCredentials};

/// Credential kind supplied to [`KeepClient::login`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMode {
    #[default]
    AppPassword,
    OauthToken,
}

/// How the current session was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    AppPassword,
    OauthToken,
    /// Restored silently from a stored master token
    Stored,
}

impl From<LoginMode> for AuthMode {
    fn from(mode: LoginMode) -> Self {
        match mode {
            LoginMode::AppPassword => Self::AppPassword,
            LoginMode::OauthToken => Self::OauthToken,
        }
    }
}

/// Snapshot of the in-memory session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub logged_in: bool,
    pub email: Option<String>,
    pub auth_mode: Option<AuthMode>,
}

/// Owns the sync session and serializes every operation that touches it.
pub struct KeepClient {
    storage: BridgeStorage,
    exchange: Arc<dyn CredentialExchange>,
    backend: Arc<dyn NoteSyncBackend>,
    device_id: String,
    session: Mutex<Option<Box<dyn NoteSyncSession>>>,
    status: RwLock<SessionStatus>,
}

impl fmt::Debug for KeepClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("KeepClient")
            .field("storage", &self.storage)
            .field("device_id", &self.device_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl KeepClient {
    /// Build a client without touching the network.
    pub fn new(
        storage: BridgeStorage,
        exchange: Arc<dyn CredentialExchange>,
        backend: Arc<dyn NoteSyncBackend>,
    ) -> std::result::Result<Self, StorageError> {
        let device_id = storage.get_or_create_device_id()?;
        Ok(Self {
            storage,
            exchange,
            backend,
            device_id,
            session: Mutex::new(None),
            status: RwLock::new(SessionStatus::default()),
        })
    }

    /// Build a client and silently restore a stored session if possible.
    pub async fn open(
        storage: BridgeStorage,
        exchange: Arc<dyn CredentialExchange>,
        backend: Arc<dyn NoteSyncBackend>,
    ) -> std::result::Result<Self, StorageError> {
        let client = Self::new(storage, exchange, backend)?;
        client.restore_session().await;
        Ok(client)
    }

    pub fn status(&self) -> SessionStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn logged_in(&self) -> bool {
        self.status().logged_in
    }

    pub fn email(&self) -> Option<String> {
        self.status().email
    }

    pub fn auth_mode(&self) -> Option<AuthMode> {
        self.status().auth_mode
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn token_storage(&self) -> TokenStorage {
        self.storage.get_token_storage()
    }

    pub const fn storage(&self) -> &BridgeStorage {
        &self.storage
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Re-authenticate from the stored email and master token. Failures are
    /// logged and leave the client logged out.
    pub async fn restore_session(&self) -> bool {
        let Some(email) = self.storage.get_email() else {
            return false;
        };
        let Some(master_token) = self.storage.get_master_token(&email) else {
            tracing::debug!("Stored email has no master token; staying logged out");
            return false;
        };

        let mut guard = self.session.lock().await;
        match self.authenticate(&email, &master_token).await {
            Ok(session) => {
                *guard = Some(session);
                self.set_status(SessionStatus {
                    logged_in: true,
                    email: Some(email),
                    auth_mode: Some(AuthMode::Stored),
                });
                tracing::info!("Restored stored Keep session");
                true
            }
            Err(error) => {
                tracing::warn!("Failed to restore stored Keep session: {}", error);
                false
            }
        }
    }

    /// Exchange `secret` for a master token, open a session with it, and
    /// persist the token.
    pub async fn login(&self, email: &str, secret: &str, mode: LoginMode) -> Result<()> {
        let mut guard = self.session.lock().await;

        let response = match mode {
            LoginMode::AppPassword => {
                self.exchange
                    .exchange_app_password(email, secret, &self.device_id)
                    .await?
            }
            LoginMode::OauthToken => {
                self.exchange
                    .exchange_oauth_token(email, secret, &self.device_id)
                    .await?
            }
        };
        let master_token = master_token_from(&response)?;

        let session = self.authenticate(email, &master_token).await?;
        let token_storage = self.storage.set_master_token(email, &master_token)?;

        *guard = Some(session);
        self.set_status(SessionStatus {
            logged_in: true,
            email: Some(email.to_string()),
            auth_mode: Some(mode.into()),
        });
        tracing::info!(?mode, %token_storage, "Logged in to Keep");
        Ok(())
    }

    /// Drop the session. With `forget`, also delete the stored credential.
    pub async fn logout(&self, forget: bool) -> Result<()> {
        let mut guard = self.session.lock().await;
        if forget {
            let email = self.email().or_else(|| self.storage.get_email());
            self.storage.clear_master_token(email.as_deref())?;
        }

        *guard = None;
        self.set_status(SessionStatus::default());
        tracing::info!(forget, "Logged out of Keep");
        Ok(())
    }

    /// Sync and return every note's summary. Empty when logged out.
    pub async fn list_notes(&self) -> Result<Vec<NoteSummary>> {
        let mut guard = self.session.lock().await;
        match guard.as_mut() {
            Some(session) => sync_summaries(&mut **session).await,
            None => Ok(Vec::new()),
        }
    }

    /// Compare current notes against `known_hashes`, or against the persisted
    /// snapshot when none are supplied. With `persist`, the fresh snapshot
    /// becomes the baseline for the next comparison.
    ///
    /// Fails with [`Error::NotLoggedIn`] when no session exists, leaving the
    /// persisted snapshot untouched. The session lock is held until the
    /// snapshot is written.
    pub async fn compare_notes(
        &self,
        known_hashes: Option<BTreeMap<String, String>>,
        persist: bool,
    ) -> Result<CompareResult> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::NotLoggedIn)?;
        let notes = sync_summaries(&mut **session).await?;
        let known_hashes = known_hashes.unwrap_or_else(|| {
            self.storage
                .get_note_state()
                .into_iter()
                .map(|(id, entry)| (id, entry.hash))
                .collect()
        });

        let result = compare_notes(notes, &known_hashes);
        if persist {
            self.storage.set_note_state(result.note_state())?;
        }

        tracing::info!(
            total = result.summary.total,
            new = result.summary.new,
            modified = result.summary.modified,
            persist,
            "Compared Keep notes"
        );
        Ok(result)
    }

    async fn authenticate(
        &self,
        email: &str,
        master_token: &str,
    ) -> Result<Box<dyn NoteSyncSession>> {
        let credentials = SessionCredentials {
            email: email.to_string(),
            master_token: master_token.to_string(),
            device_id: self.device_id.clone(),
        };
        let mut session = self.backend.connect(&credentials).await?;
        session.sync().await?;
        Ok(session)
    }
}

async fn sync_summaries(session: &mut dyn NoteSyncSession) -> Result<Vec<NoteSummary>> {
    session.sync().await?;
    let notes: Vec<NoteSummary> = session.notes().iter().map(NoteSummary::from).collect();
    tracing::debug!(count = notes.len(), "Synced Keep notes");
    Ok(notes)
}

fn master_token_from(response: &ExchangeResponse) -> Result<String> {
    if response.needs_browser() {
        return Err(Error::BrowserLoginRequired {
            url: response.url().map(str::to_string),
        });
    }
    response
        .token()
        .map(str::to_string)
        .ok_or_else(|| Error::Authentication(response.failure_message()))
}

//! In-memory collaborators for exercising [`crate::KeepClient`] without a
//! network.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::DateTime;

use crate::auth::{CredentialExchange, ExchangeResponse, ExchangeResult, ServiceGrant};
use crate::models::{NoteKind, NoteLabel, RemoteNote};
use crate::sync::{NoteSyncBackend, NoteSyncSession, SessionCredentials, SyncError, SyncResult};

/// Note with fixed timestamps and one label, text derived from `title`.
pub fn remote_note(id: &str, title: &str) -> RemoteNote {
    let created = DateTime::from_timestamp(1_704_164_645, 0).unwrap_or_default();
    RemoteNote {
        id: id.to_string(),
        title: title.to_string(),
        text: format!("{title} body"),
        created,
        updated: created,
        labels: vec![NoteLabel::new("tag.work", Some("Work"))],
        archived: false,
        pinned: false,
        kind: NoteKind::Note,
    }
}

#[derive(Debug, Default)]
struct ExchangeState {
    passwords: HashMap<String, String>,
    oauth_tokens: HashMap<String, String>,
    browser_url: Option<String>,
    device_ids: Vec<String>,
}

/// Credential exchange answering from a fixed table. Unknown credentials get
/// `Error=BadAuthentication`.
#[derive(Debug, Default)]
pub struct FakeExchange {
    state: Mutex<ExchangeState>,
}

impl FakeExchange {
    fn state(&self) -> std::sync::MutexGuard<'_, ExchangeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn accept_password(&self, password: &str, master_token: &str) {
        self.state()
            .passwords
            .insert(password.to_string(), master_token.to_string());
    }

    pub fn accept_oauth_token(&self, oauth_token: &str, master_token: &str) {
        self.state()
            .oauth_tokens
            .insert(oauth_token.to_string(), master_token.to_string());
    }

    /// Answer every credential exchange with `NeedsBrowser`.
    pub fn require_browser(&self, url: &str) {
        self.state().browser_url = Some(url.to_string());
    }

    /// Device ids seen by credential exchanges, in call order.
    pub fn seen_device_ids(&self) -> Vec<String> {
        self.state().device_ids.clone()
    }

    fn answer(&self, oauth: bool, secret: &str, device_id: &str) -> ExchangeResponse {
        let mut state = self.state();
        state.device_ids.push(device_id.to_string());
        if let Some(url) = &state.browser_url {
            return [("Error", "NeedsBrowser"), ("Url", url.as_str())]
                .into_iter()
                .collect();
        }
        let table = if oauth {
            &state.oauth_tokens
        } else {
            &state.passwords
        };
        match table.get(secret) {
            Some(master_token) => [("Token", master_token.as_str())].into_iter().collect(),
            None => [("Error", "BadAuthentication")].into_iter().collect(),
        }
    }
}

#[async_trait]
impl CredentialExchange for FakeExchange {
    async fn exchange_app_password(
        &self,
        _email: &str,
        password: &str,
        device_id: &str,
    ) -> ExchangeResult<ExchangeResponse> {
        Ok(self.answer(false, password, device_id))
    }

    async fn exchange_oauth_token(
        &self,
        _email: &str,
        oauth_token: &str,
        device_id: &str,
    ) -> ExchangeResult<ExchangeResponse> {
        Ok(self.answer(true, oauth_token, device_id))
    }

    async fn authorize_service(
        &self,
        _email: &str,
        master_token: &str,
        _device_id: &str,
        grant: &ServiceGrant,
    ) -> ExchangeResult<ExchangeResponse> {
        let auth = format!("{}:{master_token}", grant.app);
        Ok([("Auth", auth)].into_iter().collect())
    }
}

/// Sync backend serving a shared, mutable note list.
#[derive(Debug, Default)]
pub struct FakeSyncBackend {
    accepted: Mutex<HashSet<String>>,
    notes: Arc<Mutex<Vec<RemoteNote>>>,
    syncs: Arc<AtomicUsize>,
    fail_sync: Arc<AtomicBool>,
}

impl FakeSyncBackend {
    pub fn accept_master_token(&self, master_token: &str) {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(master_token.to_string());
    }

    /// Replace the remote notes. Sessions see them on their next sync.
    pub fn set_notes(&self, notes: Vec<RemoteNote>) {
        *self.notes.lock().unwrap_or_else(PoisonError::into_inner) = notes;
    }

    /// Make every subsequent sync fail with an API error.
    pub fn fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NoteSyncBackend for FakeSyncBackend {
    async fn connect(
        &self,
        credentials: &SessionCredentials,
    ) -> SyncResult<Box<dyn NoteSyncSession>> {
        let accepted = self
            .accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&credentials.master_token);
        if !accepted {
            return Err(SyncError::Authentication(
                "BadAuthentication: master token rejected".to_string(),
            ));
        }

        Ok(Box::new(FakeSyncSession {
            remote: Arc::clone(&self.notes),
            syncs: Arc::clone(&self.syncs),
            fail_sync: Arc::clone(&self.fail_sync),
            local: Vec::new(),
        }))
    }
}

struct FakeSyncSession {
    remote: Arc<Mutex<Vec<RemoteNote>>>,
    syncs: Arc<AtomicUsize>,
    fail_sync: Arc<AtomicBool>,
    local: Vec<RemoteNote>,
}

#[async_trait]
impl NoteSyncSession for FakeSyncSession {
    async fn sync(&mut self) -> SyncResult<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(SyncError::Api("HTTP 503: backend unavailable".to_string()));
        }
        self.local = self
            .remote
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(())
    }

    fn notes(&self) -> Vec<RemoteNote> {
        self.local.clone()
    }
}

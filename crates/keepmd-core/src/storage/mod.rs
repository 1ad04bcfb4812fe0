//! Local bridge state: device id, master token, and note-state snapshot.
//!
//! Everything lives in one JSON document that is re-read and rewritten in
//! full on every mutation. Reads never fail: a missing or corrupt document
//! reads as empty. Writes create the parent directory and propagate errors.

mod document;
mod secret;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

pub use document::{BridgeDocument, TokenStorage};
#[cfg(any(test, feature = "testing"))]
pub use secret::MemorySecretStore;
pub use secret::{
    KeyringSecretStore, SecretResult, SecretStore, SecretStoreError, KEYRING_SERVICE_NAME,
};

use crate::models::NoteStateEntry;

const STATE_DIR_NAME: &str = ".keeptomd";
const STATE_FILE_NAME: &str = "bridge.json";
const DEVICE_ID_BYTES: usize = 8;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to write bridge state at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize bridge state: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of reading the state document from disk
#[derive(Debug)]
pub enum DocumentLoad {
    Missing,
    Corrupt(String),
    Loaded(BridgeDocument),
}

impl DocumentLoad {
    pub fn into_document(self) -> BridgeDocument {
        match self {
            Self::Loaded(document) => document,
            Self::Missing | Self::Corrupt(_) => BridgeDocument::default(),
        }
    }
}

/// Default state file location: `~/.keeptomd/bridge.json`.
pub fn default_state_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(STATE_DIR_NAME).join(STATE_FILE_NAME))
}

/// Read-modify-write access to the bridge state document.
#[derive(Clone)]
pub struct BridgeStorage {
    path: PathBuf,
    secrets: Option<Arc<dyn SecretStore>>,
}

impl std::fmt::Debug for BridgeStorage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BridgeStorage")
            .field("path", &self.path)
            .field("secure_store", &self.secrets.is_some())
            .finish()
    }
}

impl BridgeStorage {
    /// Storage at `path`. With `secrets`, master tokens go to the secure
    /// store and only fall back to the document when the store fails.
    pub fn new(path: impl Into<PathBuf>, secrets: Option<Arc<dyn SecretStore>>) -> Self {
        Self {
            path: path.into(),
            secrets,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> DocumentLoad {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return DocumentLoad::Missing,
            Err(error) => return DocumentLoad::Corrupt(error.to_string()),
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(object)) => DocumentLoad::Loaded(BridgeDocument::from_object(object)),
            Ok(_) => DocumentLoad::Corrupt("top-level value is not an object".to_string()),
            Err(error) => DocumentLoad::Corrupt(error.to_string()),
        }
    }

    fn read(&self) -> BridgeDocument {
        let load = self.load();
        if let DocumentLoad::Corrupt(reason) = &load {
            tracing::warn!(
                path = %self.path.display(),
                "Ignoring unreadable bridge state: {}",
                reason
            );
        }
        load.into_document()
    }

    fn save(&self, document: &BridgeDocument) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let serialized = serde_json::to_string_pretty(document)?;
        std::fs::write(&self.path, serialized).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Stable per-installation id: 16 lowercase hex characters.
    pub fn get_or_create_device_id(&self) -> Result<String, StorageError> {
        let mut document = self.read();
        if let Some(device_id) = document.device_id.as_deref() {
            if is_valid_device_id(device_id) {
                return Ok(device_id.to_string());
            }
        }

        let device_id = generate_device_id();
        document.device_id = Some(device_id.clone());
        self.save(&document)?;
        tracing::info!(path = %self.path.display(), "Generated new device id");
        Ok(device_id)
    }

    pub fn get_email(&self) -> Option<String> {
        self.read().email
    }

    pub fn get_token_storage(&self) -> TokenStorage {
        self.read().token_storage.unwrap_or_default()
    }

    /// Master token for `email`, read from wherever the recorded mode says it
    /// was written.
    pub fn get_master_token(&self, email: &str) -> Option<String> {
        let document = self.read();
        match document.token_storage.unwrap_or_default() {
            TokenStorage::File => document.master_token,
            TokenStorage::Keyring => {
                let Some(secrets) = &self.secrets else {
                    tracing::warn!("Master token is in the keyring but no secure store is configured");
                    return None;
                };
                match secrets.get(email) {
                    Ok(token) => token,
                    Err(error) => {
                        tracing::warn!("Failed to read master token from secure store: {}", error);
                        None
                    }
                }
            }
        }
    }

    /// Persist the master token, preferring the secure store. Returns the
    /// storage mode actually used.
    pub fn set_master_token(&self, email: &str, token: &str) -> Result<TokenStorage, StorageError> {
        let mut document = self.read();

        let stored_securely = self.secrets.as_ref().is_some_and(|secrets| {
            secrets
                .set(email, token)
                .map_err(|error| {
                    tracing::warn!(
                        "Secure store rejected master token, falling back to file: {}",
                        error
                    );
                })
                .is_ok()
        });

        let mode = if stored_securely {
            document.master_token = None;
            TokenStorage::Keyring
        } else {
            document.master_token = Some(token.to_string());
            TokenStorage::File
        };
        document.token_storage = Some(mode);
        document.email = Some(email.to_string());
        self.save(&document)?;
        Ok(mode)
    }

    /// Forget the stored credential. Secure store failures are logged and
    /// otherwise ignored.
    pub fn clear_master_token(&self, email: Option<&str>) -> Result<(), StorageError> {
        let mut document = self.read();
        if let (Some(secrets), Some(email)) = (&self.secrets, email) {
            if let Err(error) = secrets.delete(email) {
                tracing::warn!("Failed to delete master token from secure store: {}", error);
            }
        }

        document.master_token = None;
        document.email = None;
        document.token_storage = Some(TokenStorage::File);
        self.save(&document)
    }

    pub fn get_note_state(&self) -> BTreeMap<String, NoteStateEntry> {
        self.read().note_state
    }

    /// Replace the persisted note-state snapshot wholesale.
    pub fn set_note_state(
        &self,
        state: BTreeMap<String, NoteStateEntry>,
    ) -> Result<(), StorageError> {
        let mut document = self.read();
        document.note_state = state;
        self.save(&document)
    }
}

fn is_valid_device_id(value: &str) -> bool {
    value.len() == DEVICE_ID_BYTES * 2 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn generate_device_id() -> String {
    hex::encode(rand::random::<[u8; DEVICE_ID_BYTES]>())
}

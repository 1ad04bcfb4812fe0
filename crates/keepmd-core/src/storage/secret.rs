//! Secure credential store seam with an OS keyring implementation.

use keyring::Entry;
use thiserror::Error;

/// Keyring service the master token is stored under, keyed by account email.
pub const KEYRING_SERVICE_NAME: &str = "KeepToMD Bridge";

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("Secure store unavailable: {0}")]
    Unavailable(String),
    #[error("Secret value must not be empty")]
    EmptySecret,
}

pub type SecretResult<T> = Result<T, SecretStoreError>;

/// Capability interface over a secure credential store.
///
/// `get` distinguishes an absent secret (`Ok(None)`) from a store that
/// cannot be reached (`Err`). Deleting an absent secret succeeds.
pub trait SecretStore: Send + Sync {
    fn get(&self, account: &str) -> SecretResult<Option<String>>;
    fn set(&self, account: &str, secret: &str) -> SecretResult<()>;
    fn delete(&self, account: &str) -> SecretResult<()>;
}

/// Secret store backed by the OS keyring (`keyring` crate).
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service_name: String,
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self {
            service_name: KEYRING_SERVICE_NAME.to_string(),
        }
    }
}

impl KeyringSecretStore {
    fn entry(&self, account: &str) -> SecretResult<Entry> {
        Entry::new(&self.service_name, account).map_err(map_keyring_error)
    }
}

impl SecretStore for KeyringSecretStore {
    fn get(&self, account: &str) -> SecretResult<Option<String>> {
        match self.entry(account)?.get_password() {
            Ok(value) => Ok(normalize_secret(&value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(map_keyring_error(error)),
        }
    }

    fn set(&self, account: &str, secret: &str) -> SecretResult<()> {
        let secret = normalize_secret(secret).ok_or(SecretStoreError::EmptySecret)?;
        self.entry(account)?
            .set_password(&secret)
            .map_err(map_keyring_error)
    }

    fn delete(&self, account: &str) -> SecretResult<()> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(map_keyring_error(error)),
        }
    }
}

fn normalize_secret(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn map_keyring_error(error: keyring::Error) -> SecretStoreError {
    SecretStoreError::Unavailable(error.to_string())
}

#[cfg(any(test, feature = "testing"))]
pub use memory::MemorySecretStore;

#[cfg(any(test, feature = "testing"))]
mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{normalize_secret, SecretResult, SecretStore, SecretStoreError};

    /// In-process secret store for tests.
    #[derive(Debug, Default)]
    pub struct MemorySecretStore {
        secrets: Mutex<HashMap<String, String>>,
    }

    impl MemorySecretStore {
        fn guard(&self) -> SecretResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
            self.secrets
                .lock()
                .map_err(|error| SecretStoreError::Unavailable(error.to_string()))
        }
    }

    impl SecretStore for MemorySecretStore {
        fn get(&self, account: &str) -> SecretResult<Option<String>> {
            Ok(self.guard()?.get(account).cloned())
        }

        fn set(&self, account: &str, secret: &str) -> SecretResult<()> {
            let secret = normalize_secret(secret).ok_or(SecretStoreError::EmptySecret)?;
            self.guard()?.insert(account.to_string(), secret);
            Ok(())
        }

        fn delete(&self, account: &str) -> SecretResult<()> {
            self.guard()?.remove(account);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemorySecretStore::default();
        assert_eq!(store.get("user@example.com").unwrap(), None);

        store.set("user@example.com", " master ").unwrap();
        assert_eq!(
            store.get("user@example.com").unwrap().as_deref(),
            Some("master")
        );

        store.delete("user@example.com").unwrap();
        store.delete("user@example.com").unwrap();
        assert_eq!(store.get("user@example.com").unwrap(), None);
    }

    #[test]
    fn keyring_store_uses_bridge_service() {
        let store = KeyringSecretStore::default();
        assert_eq!(store.service_name, KEYRING_SERVICE_NAME);
        assert_eq!(store.service_name, "KeepToMD Bridge");
    }

    #[test]
    fn empty_secret_is_rejected() {
        let store = MemorySecretStore::default();
        let error = store.set("user@example.com", "   ").unwrap_err();
        assert!(matches!(error, SecretStoreError::EmptySecret));
    }
}

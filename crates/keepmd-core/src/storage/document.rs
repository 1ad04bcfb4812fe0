//! On-disk bridge state document.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::models::NoteStateEntry;

/// Where the master token currently lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStorage {
    Keyring,
    #[default]
    File,
}

impl TokenStorage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Keyring => "keyring",
            Self::File => "file",
        }
    }
}

impl fmt::Display for TokenStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStorage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            other => Err(format!("unknown token storage `{other}`")),
        }
    }
}

/// Contents of the bridge state file.
///
/// Unknown top-level keys are carried through rewrites untouched. Known and
/// unknown keys serialize together as one map in lexicographic order.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BridgeDocument {
    pub device_id: Option<String>,
    pub email: Option<String>,
    pub master_token: Option<String>,
    pub note_state: BTreeMap<String, NoteStateEntry>,
    pub token_storage: Option<TokenStorage>,
    pub extra: BTreeMap<String, Value>,
}

impl Serialize for BridgeDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut fields: BTreeMap<&str, Value> = self
            .extra
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect();

        for (key, value) in [
            ("device_id", &self.device_id),
            ("email", &self.email),
            ("master_token", &self.master_token),
        ] {
            if let Some(value) = value {
                fields.insert(key, Value::String(value.clone()));
            }
        }
        if !self.note_state.is_empty() {
            let note_state =
                serde_json::to_value(&self.note_state).map_err(serde::ser::Error::custom)?;
            fields.insert("note_state", note_state);
        }
        if let Some(token_storage) = self.token_storage {
            fields.insert("token_storage", Value::from(token_storage.as_str()));
        }

        serializer.collect_map(fields)
    }
}

impl fmt::Debug for BridgeDocument {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BridgeDocument")
            .field("device_id", &self.device_id)
            .field("email", &self.email)
            .field(
                "master_token",
                &self.master_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("note_state", &self.note_state.len())
            .field("token_storage", &self.token_storage)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BridgeDocument {
    /// Build a document from a parsed JSON object, keeping every well-formed
    /// field and dropping malformed ones.
    pub fn from_object(mut object: Map<String, Value>) -> Self {
        let device_id = take_string(&mut object, "device_id");
        let email = take_string(&mut object, "email");
        let master_token = take_string(&mut object, "master_token");
        let token_storage = object
            .remove("token_storage")
            .and_then(|value| value.as_str().and_then(|raw| raw.parse().ok()));
        let note_state = object
            .remove("note_state")
            .map(parse_note_state)
            .unwrap_or_default();

        Self {
            device_id,
            email,
            master_token,
            note_state,
            token_storage,
            extra: object.into_iter().collect(),
        }
    }
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key) {
        Some(Value::String(value)) => Some(value),
        _ => None,
    }
}

fn parse_note_state(value: Value) -> BTreeMap<String, NoteStateEntry> {
    let Value::Object(entries) = value else {
        return BTreeMap::new();
    };

    entries
        .into_iter()
        .filter_map(|(id, entry)| {
            let hash = entry.get("hash").and_then(Value::as_str)?.to_string();
            let updated = entry
                .get("updated")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some((id, NoteStateEntry { hash, updated }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn malformed_fields_are_dropped_individually() {
        let document = BridgeDocument::from_object(object(json!({
            "device_id": 42,
            "email": "user@example.com",
            "token_storage": "vault",
            "note_state": {
                "a": {"hash": "h1", "updated": "2024-01-01T00:00:00.000000Z"},
                "b": {"updated": "2024-01-01T00:00:00.000000Z"},
                "c": "not-an-object"
            }
        })));

        assert_eq!(document.device_id, None);
        assert_eq!(document.email.as_deref(), Some("user@example.com"));
        assert_eq!(document.token_storage, None);
        assert_eq!(document.note_state.len(), 1);
        assert_eq!(document.note_state["a"].hash, "h1");
    }

    #[test]
    fn serialization_sorts_keys_and_keeps_unknown_fields() {
        let document = BridgeDocument::from_object(object(json!({
            "zeta": true,
            "token_storage": "keyring",
            "device_id": "0123456789abcdef",
            "alpha": 1
        })));

        let rendered = serde_json::to_string(&document).unwrap();
        assert_eq!(
            rendered,
            r#"{"alpha":1,"device_id":"0123456789abcdef","token_storage":"keyring","zeta":true}"#
        );
    }

    #[test]
    fn unknown_keys_interleave_with_known_keys() {
        let mut document = BridgeDocument::from_object(object(json!({
            "favorite": "x",
            "version": 2
        })));
        document.email = Some("user@example.com".to_string());
        document.note_state.insert(
            "a".to_string(),
            NoteStateEntry {
                hash: "h1".to_string(),
                updated: "2024-01-01T00:00:00.000000Z".to_string(),
            },
        );

        let rendered = serde_json::to_string_pretty(&document).unwrap();
        let keys: Vec<&str> = rendered
            .lines()
            .filter(|line| line.starts_with("  \""))
            .filter_map(|line| line.trim().split('"').nth(1))
            .collect();
        assert_eq!(keys, vec!["email", "favorite", "note_state", "version"]);
    }

    #[test]
    fn debug_redacts_master_token() {
        let document = BridgeDocument {
            master_token: Some("secret-master-token".to_string()),
            ..Default::default()
        };
        let rendered = format!("{document:?}");
        assert!(!rendered.contains("secret-master-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn token_storage_parses_known_modes() {
        assert_eq!("keyring".parse::<TokenStorage>(), Ok(TokenStorage::Keyring));
        assert_eq!(" FILE ".parse::<TokenStorage>(), Ok(TokenStorage::File));
        assert!("vault".parse::<TokenStorage>().is_err());
    }
}

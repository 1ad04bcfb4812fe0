//! Note snapshot model and content hashing

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Whether a note is free text or a checklist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    Note,
    List,
}

/// A label attached to a remote note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteLabel {
    /// Stable label id
    pub id: String,
    /// Display name, when the sync collaborator could resolve one
    pub name: Option<String>,
}

impl NoteLabel {
    pub fn new(id: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
        }
    }
}

/// A note as reported by the note sync collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNote {
    pub id: String,
    pub title: String,
    pub text: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub labels: Vec<NoteLabel>,
    pub archived: bool,
    pub pinned: bool,
    pub kind: NoteKind,
}

impl RemoteNote {
    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(self.kind, NoteKind::List)
    }

    /// Label strings used for hashing and reporting.
    ///
    /// Named labels are reported by name. When no label carries a name, the
    /// raw label ids are used instead. The result is sorted and de-duplicated.
    #[must_use]
    pub fn label_names(&self) -> Vec<String> {
        let named: BTreeSet<String> = self
            .labels
            .iter()
            .filter_map(|label| label.name.clone())
            .collect();
        if !named.is_empty() {
            return named.into_iter().collect();
        }

        self.labels
            .iter()
            .map(|label| label.id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// SHA-256 hex digest of the canonical projection of this note.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let labels = self.label_names();
        let created = format_timestamp(&self.created);
        let updated = format_timestamp(&self.updated);
        hash_payload(&HashPayload {
            archived: self.archived,
            created: &created,
            id: &self.id,
            is_list: self.is_list(),
            labels: &labels,
            pinned: self.pinned,
            text: &self.text,
            title: &self.title,
            updated: &updated,
        })
    }
}

/// Canonical note summary returned to bridge clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteSummary {
    pub id: String,
    pub title: String,
    pub text: String,
    pub created: String,
    pub updated: String,
    pub labels: Vec<String>,
    pub is_list: bool,
    pub hash: String,
}

impl From<&RemoteNote> for NoteSummary {
    fn from(note: &RemoteNote) -> Self {
        Self {
            id: note.id.clone(),
            title: note.title.clone(),
            text: note.text.clone(),
            created: format_timestamp(&note.created),
            updated: format_timestamp(&note.updated),
            labels: note.label_names(),
            is_list: note.is_list(),
            hash: note.content_hash(),
        }
    }
}

/// ISO-8601 timestamp with microsecond precision, always in UTC.
#[must_use]
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// Field order is the serialized key order and must stay lexicographic.
#[derive(Serialize)]
struct HashPayload<'a> {
    archived: bool,
    created: &'a str,
    id: &'a str,
    is_list: bool,
    labels: &'a [String],
    pinned: bool,
    text: &'a str,
    title: &'a str,
    updated: &'a str,
}

fn canonical_json(payload: &HashPayload<'_>) -> Vec<u8> {
    serde_json::to_vec(payload).expect("hash payload contains only strings and bools")
}

fn hash_payload(payload: &HashPayload<'_>) -> String {
    hex::encode(Sha256::digest(canonical_json(payload)))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_note() -> RemoteNote {
        RemoteNote {
            id: "note-1".to_string(),
            title: "Groceries".to_string(),
            text: "milk\neggs".to_string(),
            created: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            updated: Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap(),
            labels: vec![
                NoteLabel::new("tag.2", Some("shopping")),
                NoteLabel::new("tag.1", Some("home")),
            ],
            archived: false,
            pinned: true,
            kind: NoteKind::Note,
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let note = sample_note();
        assert_eq!(note.content_hash(), note.clone().content_hash());
        assert_eq!(note.content_hash().len(), 64);
    }

    #[test]
    fn canonical_json_sorts_keys_and_labels() {
        let note = sample_note();
        let labels = note.label_names();
        let created = format_timestamp(&note.created);
        let updated = format_timestamp(&note.updated);
        let payload = HashPayload {
            archived: note.archived,
            created: &created,
            id: &note.id,
            is_list: note.is_list(),
            labels: &labels,
            pinned: note.pinned,
            text: &note.text,
            title: &note.title,
            updated: &updated,
        };
        let rendered = String::from_utf8(canonical_json(&payload)).unwrap();
        assert_eq!(
            rendered,
            r#"{"archived":false,"created":"2024-01-02T03:04:05.000000Z","id":"note-1","is_list":false,"labels":["home","shopping"],"pinned":true,"text":"milk\neggs","title":"Groceries","updated":"2024-02-03T04:05:06.000000Z"}"#
        );
    }

    #[test]
    fn label_order_does_not_change_hash() {
        let note = sample_note();
        let mut reordered = note.clone();
        reordered.labels.reverse();
        assert_eq!(note.content_hash(), reordered.content_hash());
    }

    #[test]
    fn every_hashed_field_changes_hash() {
        let base = sample_note();
        let original = base.content_hash();

        let mutations: [fn(&mut RemoteNote); 9] = [
            |note| note.id = "note-2".to_string(),
            |note| note.title.push('!'),
            |note| note.text.push_str("\nbread"),
            |note| note.labels.push(NoteLabel::new("tag.3", Some("urgent"))),
            |note| note.created = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            |note| note.updated = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            |note| note.archived = true,
            |note| note.pinned = false,
            |note| note.kind = NoteKind::List,
        ];

        for mutate in mutations {
            let mut changed = base.clone();
            mutate(&mut changed);
            assert_ne!(changed.content_hash(), original);
        }
    }

    #[test]
    fn unnamed_labels_fall_back_to_ids() {
        let mut note = sample_note();
        note.labels = vec![NoteLabel::new("tag.b", None), NoteLabel::new("tag.a", None)];
        assert_eq!(note.label_names(), vec!["tag.a", "tag.b"]);

        note.labels.push(NoteLabel::new("tag.c", Some("work")));
        assert_eq!(note.label_names(), vec!["work"]);
    }

    #[test]
    fn summary_carries_hash_and_list_flag() {
        let mut note = sample_note();
        note.kind = NoteKind::List;
        let summary = NoteSummary::from(&note);
        assert!(summary.is_list);
        assert_eq!(summary.hash, note.content_hash());
        assert_eq!(summary.created, "2024-01-02T03:04:05.000000Z");
        assert_eq!(summary.labels, vec!["home", "shopping"]);
    }
}

//! Change detection against a known-hash baseline

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::note::NoteSummary;

/// Per-note entry of the persisted note-state snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteStateEntry {
    pub hash: String,
    pub updated: String,
}

/// How a note relates to the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Modified,
    Unchanged,
}

/// Counts reported alongside a comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareSummary {
    pub total: usize,
    pub new: usize,
    pub modified: usize,
    pub unchanged: usize,
}

/// Result of comparing the current notes against a baseline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareResult {
    pub summary: CompareSummary,
    pub new: Vec<NoteSummary>,
    pub modified: Vec<NoteSummary>,
    pub hashes: BTreeMap<String, String>,
    pub notes: Vec<NoteSummary>,
}

impl CompareResult {
    /// Snapshot to persist as the next comparison baseline.
    #[must_use]
    pub fn note_state(&self) -> BTreeMap<String, NoteStateEntry> {
        self.notes
            .iter()
            .map(|note| {
                (
                    note.id.clone(),
                    NoteStateEntry {
                        hash: note.hash.clone(),
                        updated: note.updated.clone(),
                    },
                )
            })
            .collect()
    }
}

/// Classify a single note hash against its known hash.
///
/// A missing or empty known hash means the note is new.
#[must_use]
pub fn classify(known: Option<&str>, current: &str) -> ChangeKind {
    match known {
        None | Some("") => ChangeKind::New,
        Some(known) if known != current => ChangeKind::Modified,
        Some(_) => ChangeKind::Unchanged,
    }
}

/// Compare `notes` against `known_hashes`, keyed by note id.
#[must_use]
pub fn compare_notes(
    notes: Vec<NoteSummary>,
    known_hashes: &BTreeMap<String, String>,
) -> CompareResult {
    let mut new = Vec::new();
    let mut modified = Vec::new();
    let mut hashes = BTreeMap::new();

    for note in &notes {
        hashes.insert(note.id.clone(), note.hash.clone());
        match classify(known_hashes.get(&note.id).map(String::as_str), &note.hash) {
            ChangeKind::New => new.push(note.clone()),
            ChangeKind::Modified => modified.push(note.clone()),
            ChangeKind::Unchanged => {}
        }
    }

    let summary = CompareSummary {
        total: notes.len(),
        new: new.len(),
        modified: modified.len(),
        unchanged: notes.len() - new.len() - modified.len(),
    };

    CompareResult {
        summary,
        new,
        modified,
        hashes,
        notes,
    }
}

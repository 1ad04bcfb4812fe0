//! Data models for the keepmd bridge

mod compare;
mod note;

pub use compare::{
    classify, compare_notes, ChangeKind, CompareResult, CompareSummary, NoteStateEntry,
};
pub use note::{format_timestamp, NoteKind, NoteLabel, NoteSummary, RemoteNote};

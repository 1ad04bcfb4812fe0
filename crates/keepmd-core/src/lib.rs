//! keepmd-core - Core library for the keepmd bridge
//!
//! This crate contains the note snapshot model, content hashing and change
//! detection, the local state document, and the seams to the credential
//! exchange and note sync collaborators used by the HTTP bridge.

pub mod auth;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod models;
pub mod storage;
pub mod sync;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{AuthMode, KeepClient, LoginMode, SessionStatus};
pub use error::{Error, Result};
pub use models::{CompareResult, CompareSummary, NoteStateEntry, NoteSummary, RemoteNote};
pub use storage::{BridgeStorage, TokenStorage};

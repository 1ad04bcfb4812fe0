//! Read-only Google Keep sync adapter.
//!
//! Pulls the full node tree from the Keep changes endpoint and projects its
//! top-level notes and lists. Nothing is ever written back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{NoteSyncBackend, NoteSyncSession, SessionCredentials, SyncError, SyncResult};
use crate::auth::{CredentialExchange, ServiceGrant};
use crate::models::{NoteKind, NoteLabel, RemoteNote};
use crate::endpoint::{endpoint_url, response_excerpt};

pub const DEFAULT_NOTES_API_URL: &str = "https://www.googleapis.com/notes/v1";

const KEEP_SCOPES: &str =
    "oauth2:https://www.googleapis.com/auth/memento https://www.googleapis.com/auth/reminders";
const KEEP_APP: &str = "com.google.android.keep";
const KEEP_CLIENT_SIG: &str = "38918a453d07199354f8b19af05ec6562ced5788";
const ROOT_ID: &str = "root";
const CAPABILITIES: [&str; 11] = [
    "NC", "PI", "LB", "AN", "SH", "DR", "TR", "IN", "SNB", "MI", "CO",
];

/// Opens Keep sessions using service tokens from the credential exchange.
#[derive(Clone)]
pub struct KeepSyncBackend {
    exchange: Arc<dyn CredentialExchange>,
    changes_url: String,
    client: Client,
}

impl KeepSyncBackend {
    pub fn new(
        exchange: Arc<dyn CredentialExchange>,
        api_url: impl Into<String>,
    ) -> SyncResult<Self> {
        let api_url = endpoint_url(&api_url.into(), "notes API")?;
        Ok(Self {
            exchange,
            changes_url: format!("{api_url}/changes"),
            client: Client::builder().build()?,
        })
    }

    fn grant() -> ServiceGrant {
        ServiceGrant {
            service: KEEP_SCOPES.to_string(),
            app: KEEP_APP.to_string(),
            client_sig: KEEP_CLIENT_SIG.to_string(),
        }
    }
}

#[async_trait]
impl NoteSyncBackend for KeepSyncBackend {
    async fn connect(
        &self,
        credentials: &SessionCredentials,
    ) -> SyncResult<Box<dyn NoteSyncSession>> {
        let response = self
            .exchange
            .authorize_service(
                &credentials.email,
                &credentials.master_token,
                &credentials.device_id,
                &Self::grant(),
            )
            .await?;

        let access_token = response
            .auth()
            .map(str::to_string)
            .ok_or_else(|| SyncError::Authentication(response.failure_message()))?;

        Ok(Box::new(KeepSyncSession {
            client: self.client.clone(),
            changes_url: self.changes_url.clone(),
            access_token,
            session_id: new_session_id(),
            version: None,
            tree: NodeTree::default(),
        }))
    }
}

struct KeepSyncSession {
    client: Client,
    changes_url: String,
    access_token: String,
    session_id: String,
    version: Option<String>,
    tree: NodeTree,
}

impl KeepSyncSession {
    fn request_body(&self) -> Value {
        let capabilities: Vec<Value> = CAPABILITIES
            .iter()
            .map(|capability| serde_json::json!({ "type": capability }))
            .collect();
        let mut body = serde_json::json!({
            "nodes": [],
            "clientTimestamp": Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            "requestHeader": {
                "clientSessionId": self.session_id,
                "clientPlatform": "ANDROID",
                "clientVersion": {
                    "major": "9",
                    "minor": "9",
                    "build": "9",
                    "revision": "9"
                },
                "capabilities": capabilities,
            },
        });
        if let Some(version) = &self.version {
            body["targetVersion"] = Value::String(version.clone());
        }
        body
    }

    async fn pull_page(&self) -> SyncResult<ChangesResponse> {
        let response = self
            .client
            .post(&self.changes_url)
            .header(AUTHORIZATION, format!("OAuth {}", self.access_token))
            .json(&self.request_body())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(SyncError::Authentication(format!(
                    "Keep rejected the session token (HTTP {})",
                    status.as_u16()
                )));
            }
            return Err(SyncError::Api(format!(
                "HTTP {}: {}",
                status.as_u16(),
                response_excerpt(&body)
            )));
        }

        Ok(response.json::<ChangesResponse>().await?)
    }
}

#[async_trait]
impl NoteSyncSession for KeepSyncSession {
    async fn sync(&mut self) -> SyncResult<()> {
        loop {
            let page = self.pull_page().await?;
            let truncated = page.truncated;
            if let Some(version) = page.to_version.clone() {
                self.version = Some(version);
            }
            self.tree.apply(page);
            if !truncated {
                break;
            }
        }
        tracing::debug!(nodes = self.tree.nodes.len(), "Keep sync complete");
        Ok(())
    }

    fn notes(&self) -> Vec<RemoteNote> {
        self.tree.notes()
    }
}

fn new_session_id() -> String {
    format!(
        "s--{}--{}",
        Utc::now().timestamp_millis(),
        rand::random_range(1_000_000_000_u64..=9_999_999_999)
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangesResponse {
    #[serde(default)]
    to_version: Option<String>,
    #[serde(default)]
    nodes: Vec<KeepNode>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    user_info: Option<UserInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct UserInfo {
    #[serde(default)]
    labels: Vec<KeepLabel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeepLabel {
    main_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    timestamps: KeepTimestamps,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct KeepTimestamps {
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    deleted: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeepLabelRef {
    label_id: String,
    #[serde(default)]
    deleted: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeepNode {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    timestamps: KeepTimestamps,
    #[serde(default)]
    is_archived: bool,
    #[serde(default)]
    is_pinned: bool,
    #[serde(default)]
    checked: bool,
    #[serde(default)]
    sort_value: Option<Value>,
    #[serde(default)]
    label_ids: Vec<KeepLabelRef>,
}

impl KeepNode {
    fn sort_value(&self) -> i64 {
        match &self.sort_value {
            Some(Value::String(raw)) => raw.parse().unwrap_or_default(),
            Some(Value::Number(number)) => number.as_i64().unwrap_or_default(),
            _ => 0,
        }
    }

    fn note_kind(&self) -> Option<NoteKind> {
        match self.kind.as_str() {
            "NOTE" => Some(NoteKind::Note),
            "LIST" => Some(NoteKind::List),
            _ => None,
        }
    }
}

/// Local fold of every node and label seen so far.
#[derive(Debug, Default)]
struct NodeTree {
    nodes: HashMap<String, KeepNode>,
    labels: HashMap<String, String>,
}

impl NodeTree {
    fn apply(&mut self, page: ChangesResponse) {
        for node in page.nodes {
            if is_set(node.timestamps.deleted.as_deref()) {
                self.nodes.remove(&node.id);
            } else {
                self.nodes.insert(node.id.clone(), node);
            }
        }

        for label in page.user_info.unwrap_or_default().labels {
            if is_set(label.timestamps.deleted.as_deref()) {
                self.labels.remove(&label.main_id);
            } else if let Some(name) = label.name {
                self.labels.insert(label.main_id, name);
            }
        }
    }

    fn notes(&self) -> Vec<RemoteNote> {
        let mut notes: Vec<RemoteNote> = self
            .nodes
            .values()
            .filter(|node| node.parent_id == ROOT_ID)
            .filter_map(|node| node.note_kind().map(|kind| self.project(node, kind)))
            .collect();
        notes.sort_by(|a, b| a.id.cmp(&b.id));
        notes
    }

    fn items_of(&self, parent_id: &str) -> Vec<&KeepNode> {
        let mut items: Vec<&KeepNode> = self
            .nodes
            .values()
            .filter(|node| node.kind == "LIST_ITEM" && node.parent_id == parent_id)
            .collect();
        items.sort_by(|a, b| b.sort_value().cmp(&a.sort_value()).then(a.id.cmp(&b.id)));
        items
    }

    fn project(&self, node: &KeepNode, kind: NoteKind) -> RemoteNote {
        let items = self.items_of(&node.id);
        let text = match kind {
            NoteKind::Note => items
                .first()
                .and_then(|item| item.text.clone())
                .or_else(|| node.text.clone())
                .unwrap_or_default(),
            NoteKind::List => items
                .iter()
                .map(|item| {
                    let mark = if item.checked { '☑' } else { '☐' };
                    format!("{mark} {}", item.text.as_deref().unwrap_or_default())
                })
                .collect::<Vec<_>>()
                .join("\n"),
        };

        let labels = node
            .label_ids
            .iter()
            .filter(|label| !is_set(label.deleted.as_deref()))
            .map(|label| {
                NoteLabel::new(
                    label.label_id.clone(),
                    self.labels.get(&label.label_id).map(String::as_str),
                )
            })
            .collect();

        RemoteNote {
            id: node.id.clone(),
            title: node.title.clone().unwrap_or_default(),
            text,
            created: parse_timestamp(node.timestamps.created.as_deref()),
            updated: parse_timestamp(node.timestamps.updated.as_deref()),
            labels,
            archived: node.is_archived,
            pinned: node.is_pinned,
            kind,
        }
    }
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map_or(DateTime::UNIX_EPOCH, |timestamp| timestamp.with_timezone(&Utc))
}

/// Keep marks "not deleted" with the epoch rather than omitting the field.
fn is_set(raw: Option<&str>) -> bool {
    parse_timestamp(raw) > DateTime::UNIX_EPOCH
}

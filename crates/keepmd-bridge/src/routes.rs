use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use keepmd_core::{AuthMode, CompareResult, KeepClient, LoginMode, NoteSummary, TokenStorage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;

const NOT_LOGGED_IN: &str = "Not logged in.";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    client: Arc<KeepClient>,
}

impl AppState {
    pub const fn new(config: Arc<AppConfig>, client: Arc<KeepClient>) -> Self {
        Self { config, client }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(auth_status))
        .route("/auth/status", get(auth_status))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/notes", get(list_notes))
        .route("/sync/compare", post(compare_notes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    ok: bool,
    logged_in: bool,
    email: Option<String>,
    auth_mode: Option<AuthMode>,
    token_storage: TokenStorage,
    device_id: String,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

const OK: OkResponse = OkResponse { ok: true };

async fn auth_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.client.status();
    Json(StatusResponse {
        ok: true,
        logged_in: status.logged_in,
        email: status.email,
        auth_mode: status.auth_mode,
        token_storage: state.client.token_storage(),
        device_id: state.client.device_id().to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    token: Option<String>,
    password: Option<String>,
    #[serde(default)]
    mode: LoginMode,
}

impl LoginRequest {
    /// `token` wins over `password`; blank values count as absent.
    fn secret(&self) -> Option<&str> {
        [self.token.as_deref(), self.password.as_deref()]
            .into_iter()
            .flatten()
            .find(|value| !value.is_empty())
    }
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<OkResponse>, AppError> {
    let secret = request
        .secret()
        .ok_or_else(|| AppError::bad_request("Missing token."))?;

    state
        .client
        .login(&request.email, secret, request.mode)
        .await
        .map_err(|error| {
            tracing::info!(mode = ?request.mode, "Login rejected: {}", error);
            AppError::from_login(error)
        })?;
    Ok(Json(OK))
}

#[derive(Debug, Default, Deserialize)]
struct LogoutRequest {
    #[serde(default)]
    forget: bool,
}

async fn logout(State(state): State<AppState>, body: Bytes) -> Result<Json<OkResponse>, AppError> {
    let request: LogoutRequest = optional_json(&body)?;
    state.client.logout(request.forget).await?;
    Ok(Json(OK))
}

#[derive(Debug, Serialize)]
struct NotesResponse {
    notes: Vec<NoteSummary>,
}

async fn list_notes(State(state): State<AppState>) -> Result<Json<NotesResponse>, AppError> {
    if !state.client.logged_in() {
        return Err(AppError::unauthorized(NOT_LOGGED_IN));
    }
    let notes = state.client.list_notes().await?;
    Ok(Json(NotesResponse { notes }))
}

#[derive(Debug, Deserialize)]
struct CompareRequest {
    #[serde(default)]
    known_hashes: Option<BTreeMap<String, String>>,
    #[serde(default = "default_persist")]
    persist: bool,
}

impl Default for CompareRequest {
    fn default() -> Self {
        Self {
            known_hashes: None,
            persist: default_persist(),
        }
    }
}

const fn default_persist() -> bool {
    true
}

async fn compare_notes(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CompareResult>, AppError> {
    let request: CompareRequest = optional_json(&body)?;
    let result = state
        .client
        .compare_notes(request.known_hashes, request.persist)
        .await?;
    Ok(Json(result))
}

/// Parse a JSON body that may be omitted entirely.
fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|error| AppError::bad_request(format!("Malformed JSON body: {error}")))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use keepmd_core::storage::MemorySecretStore;
    use keepmd_core::testing::{remote_note, FakeExchange, FakeSyncBackend};
    use keepmd_core::BridgeStorage;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;

    struct TestApp {
        _dir: TempDir,
        router: Router,
        exchange: Arc<FakeExchange>,
        backend: Arc<FakeSyncBackend>,
    }

    impl TestApp {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let state_path = dir.path().join("bridge.json");
            let storage = BridgeStorage::new(
                state_path.clone(),
                Some(Arc::new(MemorySecretStore::default())),
            );
            let exchange = Arc::new(FakeExchange::default());
            let backend = Arc::new(FakeSyncBackend::default());
            exchange.accept_password("app-password", "master-1");
            backend.accept_master_token("master-1");

            let client = KeepClient::new(storage, exchange.clone(), backend.clone()).unwrap();
            let config = AppConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                state_path,
                token_storage: TokenStorage::Keyring,
                auth_url: keepmd_core::auth::DEFAULT_AUTH_URL.to_string(),
                notes_api_url: keepmd_core::sync::DEFAULT_NOTES_API_URL.to_string(),
            };
            let router = app_router(AppState::new(Arc::new(config), Arc::new(client)));
            Self {
                _dir: dir,
                router,
                exchange,
                backend,
            }
        }

        async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri);
            let body = match body {
                Some(value) => {
                    request = request.header("content-type", "application/json");
                    Body::from(value.to_string())
                }
                None => Body::empty(),
            };
            let response = self
                .router
                .clone()
                .oneshot(request.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        async fn login(&self) {
            let (status, _) = self
                .send(
                    "POST",
                    "/login",
                    Some(json!({"email": "user@example.com", "password": "app-password"})),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn health_reports_logged_out_status() {
        let app = TestApp::new();
        let (status, body) = app.send("GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["logged_in"], false);
        assert_eq!(body["email"], Value::Null);
        assert_eq!(body["auth_mode"], Value::Null);
        assert_eq!(body["token_storage"], "file");
        assert_eq!(body["device_id"].as_str().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn login_updates_auth_status() {
        let app = TestApp::new();
        app.login().await;

        let (status, body) = app.send("GET", "/auth/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["logged_in"], true);
        assert_eq!(body["email"], "user@example.com");
        assert_eq!(body["auth_mode"], "app_password");
        assert_eq!(body["token_storage"], "keyring");
    }

    #[tokio::test]
    async fn login_without_credential_is_bad_request() {
        let app = TestApp::new();
        let (status, body) = app
            .send(
                "POST",
                "/login",
                Some(json!({"email": "user@example.com", "token": ""})),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"detail": "Missing token."}));
    }

    #[tokio::test]
    async fn rejected_login_is_unauthorized() {
        let app = TestApp::new();
        let (status, body) = app
            .send(
                "POST",
                "/login",
                Some(json!({"email": "user@example.com", "token": "wrong", "mode": "oauth_token"})),
            )
            .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"detail": "BadAuthentication"}));
    }

    #[tokio::test]
    async fn failing_sync_during_login_is_unauthorized() {
        let app = TestApp::new();
        app.backend.fail_sync(true);
        let (status, body) = app
            .send(
                "POST",
                "/login",
                Some(json!({"email": "user@example.com", "password": "app-password"})),
            )
            .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["detail"].as_str().unwrap().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn browser_challenge_is_conflict_with_url() {
        let app = TestApp::new();
        app.exchange
            .require_browser("https://accounts.google.com/signin/continue");
        let (status, body) = app
            .send(
                "POST",
                "/login",
                Some(json!({"email": "user@example.com", "password": "app-password"})),
            )
            .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            body,
            json!({"detail": {
                "message": "Browser login required.",
                "url": "https://accounts.google.com/signin/continue"
            }})
        );
    }

    #[tokio::test]
    async fn notes_and_compare_require_login() {
        let app = TestApp::new();

        let (status, body) = app.send("GET", "/notes", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"detail": "Not logged in."}));

        let (status, body) = app.send("POST", "/sync/compare", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"detail": "Not logged in."}));
    }

    #[tokio::test]
    async fn notes_lists_summaries() {
        let app = TestApp::new();
        app.backend.set_notes(vec![remote_note("a", "Alpha")]);
        app.login().await;

        let (status, body) = app.send("GET", "/notes", None).await;
        assert_eq!(status, StatusCode::OK);
        let notes = body["notes"].as_array().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0]["id"], "a");
        assert_eq!(notes[0]["title"], "Alpha");
        assert_eq!(notes[0]["labels"], json!(["Work"]));
        assert_eq!(notes[0]["is_list"], false);
        assert_eq!(notes[0]["hash"], remote_note("a", "Alpha").content_hash());
    }

    #[tokio::test]
    async fn compare_without_body_persists_snapshot() {
        let app = TestApp::new();
        app.backend
            .set_notes(vec![remote_note("a", "Alpha"), remote_note("b", "Beta")]);
        app.login().await;

        let (status, first) = app.send("POST", "/sync/compare", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            first["summary"],
            json!({"total": 2, "new": 2, "modified": 0, "unchanged": 0})
        );

        let (_, second) = app.send("POST", "/sync/compare", Some(json!({}))).await;
        assert_eq!(
            second["summary"],
            json!({"total": 2, "new": 0, "modified": 0, "unchanged": 2})
        );
        assert_eq!(second["hashes"].as_object().unwrap().len(), 2);
        assert_eq!(second["notes"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn compare_with_known_hashes_reports_modified() {
        let app = TestApp::new();
        app.backend.set_notes(vec![remote_note("a", "Alpha")]);
        app.login().await;

        let (status, body) = app
            .send(
                "POST",
                "/sync/compare",
                Some(json!({"known_hashes": {"a": "stale"}, "persist": false})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["modified"], 1);
        assert_eq!(body["modified"][0]["id"], "a");
        assert_eq!(body["new"], json!([]));
    }

    #[tokio::test]
    async fn malformed_compare_body_is_bad_request() {
        let app = TestApp::new();
        app.login().await;

        let (status, body) = app
            .send("POST", "/sync/compare", Some(json!({"persist": "yes"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().starts_with("Malformed JSON body"));
    }

    #[tokio::test]
    async fn sync_failure_is_bad_gateway() {
        let app = TestApp::new();
        app.login().await;
        app.backend.fail_sync(true);

        let (status, _) = app.send("GET", "/notes", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn logout_accepts_missing_body_and_forget_flag() {
        let app = TestApp::new();
        app.login().await;

        let (status, body) = app.send("POST", "/logout", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
        let (_, health) = app.send("GET", "/health", None).await;
        assert_eq!(health["logged_in"], false);
        assert_eq!(health["token_storage"], "keyring");

        app.login().await;
        let (status, _) = app
            .send("POST", "/logout", Some(json!({"forget": true})))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, health) = app.send("GET", "/health", None).await;
        assert_eq!(health["token_storage"], "file");
    }
}

//! Credential exchange collaborator.
//!
//! Turns an app password or OAuth token into a long-lived master token, and a
//! master token into short-lived service tokens. The exchange endpoint speaks
//! form-encoded requests and answers with `Key=Value` lines.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::endpoint::{endpoint_url, response_excerpt, EndpointError};

pub const DEFAULT_AUTH_URL: &str = "https://android.clients.google.com/auth";

const USER_AGENT: &str = "GoogleAuth/1.4";
const ACCOUNT_TYPE: &str = "HOSTED_OR_GOOGLE";
const MASTER_SERVICE: &str = "ac2dm";
const GOOGLE_PLAY_SERVICES_VERSION: &str = "240913000";
const SDK_VERSION: &str = "17";
const ANDROID_CLIENT_SIG: &str = "38918a453d07199354f8b19af05ec6562ced5788";
const NEEDS_BROWSER: &str = "NeedsBrowser";
const REDACTED_KEYS: [&str; 2] = ["Token", "Auth"];

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Invalid credential exchange endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),
    #[error("Credential exchange request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Parsed `Key=Value` response of the exchange endpoint.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ExchangeResponse {
    fields: BTreeMap<String, String>,
}

impl ExchangeResponse {
    pub fn parse(body: &str) -> Self {
        body.lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
            .collect()
    }

    /// Parse a response regardless of status. An error status whose body
    /// carries no `Error` field gets a synthesized `Error=HTTP <code>` with an
    /// excerpt of the body as `ErrorDetail`.
    pub fn from_http(status: StatusCode, body: &str) -> Self {
        let parsed = Self::parse(body);
        if status.is_success() {
            return parsed;
        }

        tracing::debug!(
            status = status.as_u16(),
            error = parsed.error().unwrap_or("none"),
            "Credential exchange returned an error status"
        );
        if parsed.error().is_some() {
            return parsed;
        }
        let error = format!("HTTP {}", status.as_u16());
        [("Error", error), ("ErrorDetail", response_excerpt(body))]
            .into_iter()
            .collect()
    }

    /// Field value, `None` when absent or blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Master token returned by a credential exchange.
    pub fn token(&self) -> Option<&str> {
        self.get("Token")
    }

    /// Service token returned by a service authorization.
    pub fn auth(&self) -> Option<&str> {
        self.get("Auth")
    }

    pub fn error(&self) -> Option<&str> {
        self.get("Error")
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.get("ErrorDetail")
    }

    pub fn url(&self) -> Option<&str> {
        self.get("Url")
    }

    pub fn needs_browser(&self) -> bool {
        self.error() == Some(NEEDS_BROWSER)
    }

    /// Human-readable failure description built from `Error`/`ErrorDetail`.
    pub fn failure_message(&self) -> String {
        match (self.error(), self.error_detail()) {
            (Some(error), Some(detail)) => format!("{error}: {detail}"),
            (Some(error), None) => error.to_string(),
            (None, Some(detail)) => detail.to_string(),
            (None, None) => "Login failed.".to_string(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ExchangeResponse {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl fmt::Debug for ExchangeResponse {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = formatter.debug_map();
        for (key, value) in &self.fields {
            if REDACTED_KEYS.contains(&key.as_str()) {
                map.entry(key, &"[REDACTED]");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

/// Service a master token is traded in for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceGrant {
    /// Requested scopes, e.g. `oauth2:https://...`
    pub service: String,
    /// Android package the token is issued to
    pub app: String,
    /// Signing certificate digest of `app`
    pub client_sig: String,
}

#[async_trait]
pub trait CredentialExchange: Send + Sync {
    /// Trade an account (app) password for a master token.
    async fn exchange_app_password(
        &self,
        email: &str,
        password: &str,
        device_id: &str,
    ) -> ExchangeResult<ExchangeResponse>;

    /// Trade a browser-issued OAuth token for a master token.
    async fn exchange_oauth_token(
        &self,
        email: &str,
        oauth_token: &str,
        device_id: &str,
    ) -> ExchangeResult<ExchangeResponse>;

    /// Trade a master token for a short-lived token scoped to `grant`.
    async fn authorize_service(
        &self,
        email: &str,
        master_token: &str,
        device_id: &str,
        grant: &ServiceGrant,
    ) -> ExchangeResult<ExchangeResponse>;
}

/// HTTP client for a gpsoauth-compatible exchange endpoint.
#[derive(Clone)]
pub struct GpsOAuthClient {
    auth_url: String,
    client: Client,
}

impl fmt::Debug for GpsOAuthClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("GpsOAuthClient")
            .field("auth_url", &self.auth_url)
            .finish_non_exhaustive()
    }
}

impl GpsOAuthClient {
    pub fn new(auth_url: impl Into<String>) -> ExchangeResult<Self> {
        let auth_url = endpoint_url(&auth_url.into(), "auth")?;
        Ok(Self {
            auth_url,
            client: Client::builder().user_agent(USER_AGENT).build()?,
        })
    }

    async fn post(&self, form: &[(&str, &str)]) -> ExchangeResult<ExchangeResponse> {
        let response = self.client.post(&self.auth_url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(ExchangeResponse::from_http(status, &body))
    }
}

fn base_form<'a>(email: &'a str, device_id: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("accountType", ACCOUNT_TYPE),
        ("Email", email),
        ("has_permission", "1"),
        ("source", "android"),
        ("androidId", device_id),
        ("device_country", "us"),
        ("operatorCountry", "us"),
        ("lang", "en"),
        ("sdk_version", SDK_VERSION),
    ]
}

#[async_trait]
impl CredentialExchange for GpsOAuthClient {
    async fn exchange_app_password(
        &self,
        email: &str,
        password: &str,
        device_id: &str,
    ) -> ExchangeResult<ExchangeResponse> {
        let mut form = base_form(email, device_id);
        form.extend([
            ("add_account", "1"),
            ("service", MASTER_SERVICE),
            ("Passwd", password),
        ]);
        self.post(&form).await
    }

    async fn exchange_oauth_token(
        &self,
        email: &str,
        oauth_token: &str,
        device_id: &str,
    ) -> ExchangeResult<ExchangeResponse> {
        let mut form = base_form(email, device_id);
        form.extend([
            ("add_account", "1"),
            ("ACCESS_TOKEN", "1"),
            ("Token", oauth_token),
            ("service", MASTER_SERVICE),
            ("google_play_services_version", GOOGLE_PLAY_SERVICES_VERSION),
            ("client_sig", ANDROID_CLIENT_SIG),
            ("callerSig", ANDROID_CLIENT_SIG),
            ("droidguard_results", "dummy123"),
        ]);
        self.post(&form).await
    }

    async fn authorize_service(
        &self,
        email: &str,
        master_token: &str,
        device_id: &str,
        grant: &ServiceGrant,
    ) -> ExchangeResult<ExchangeResponse> {
        let mut form = base_form(email, device_id);
        form.extend([
            ("EncryptedPasswd", master_token),
            ("service", grant.service.as_str()),
            ("app", grant.app.as_str()),
            ("client_sig", grant.client_sig.as_str()),
            ("google_play_services_version", GOOGLE_PLAY_SERVICES_VERSION),
        ]);
        self.post(&form).await
    }
}

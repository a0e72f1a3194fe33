//! `ApiClient` trait and the reqwest-backed controller client.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auth::{LogonRequest, LogonResponse, Token};
use crate::error::{ApiError, Result};

/// Controller JSON documents pass through this layer untyped; the engine owns
/// the typed view and converts only at this boundary.
pub type Document = Value;

/// Request/response transport to the fabric controller.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Idempotent read.
    async fn get(&self, path: &str) -> Result<Document>;

    /// Create a resource.
    async fn save(&self, path: &str, payload: &Document) -> Result<Document>;

    /// Update a resource in place.
    async fn update(&self, path: &str, payload: &Document) -> Result<Document>;

    /// Delete a resource.
    async fn delete(&self, path: &str) -> Result<Document>;

    /// Fire-and-acknowledge trigger endpoints that take no request body
    /// (config-save, config-deploy, preview triggers).
    async fn save_and_trigger(&self, path: &str) -> Result<Document>;
}

/// Connection settings for the controller.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Accept self-signed controller certificates.
    pub insecure: bool,
    /// Requested token lifetime in milliseconds.
    pub token_lifetime_ms: i64,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            insecure: false,
            token_lifetime_ms: 180_000,
        }
    }
}

/// Authenticated client for the controller's REST API.
///
/// One instance is constructed per process and injected into every lifecycle
/// manager; the token cache is safe for concurrent reuse.
pub struct HttpClient {
    config: ClientConfig,
    http: reqwest::Client,
    token: Mutex<Option<Token>>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| ApiError::Auth(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn login(&self) -> Result<Token> {
        let path = "/rest/logon";
        let body = LogonRequest {
            expiration_time: self.config.token_lifetime_ms,
        };
        let response = self
            .http
            .post(self.url(path))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Transport {
                path: path.to_string(),
                source: e,
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ApiError::Transport {
            path: path.to_string(),
            source: e,
        })?;
        if !status.is_success() {
            return Err(ApiError::Auth(format!(
                "logon rejected with {}: {}",
                status.as_u16(),
                error_message(&text)
            )));
        }

        let logon: LogonResponse =
            serde_json::from_str(&text).map_err(|e| ApiError::Decode {
                path: path.to_string(),
                source: e,
            })?;
        debug!("Obtained controller token");
        Ok(Token::new(logon.token, self.config.token_lifetime_ms))
    }

    /// Return a valid token, logging in lazily when the cached one is missing
    /// or expired. Holding the mutex across the login serializes concurrent
    /// refreshes into one request.
    async fn ensure_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        match guard.as_ref() {
            Some(token) if !token.is_expired() => Ok(token.value.clone()),
            _ => {
                let token = self.login().await?;
                let value = token.value.clone();
                *guard = Some(token);
                Ok(value)
            }
        }
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn request(&self, method: Method, path: &str, payload: Option<&Value>) -> Result<Document> {
        // One retry after a 401: the controller may have revoked the token
        // before our local expiry margin kicked in.
        for attempt in 0..2 {
            let token = self.ensure_token().await?;
            let mut builder = self
                .http
                .request(method.clone(), self.url(path))
                .header("X-Auth-Token", &token);
            if let Some(body) = payload {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(|e| ApiError::Transport {
                path: path.to_string(),
                source: e,
            })?;

            let status = response.status();
            let text = response.text().await.map_err(|e| ApiError::Transport {
                path: path.to_string(),
                source: e,
            })?;

            if status.as_u16() == 401 && attempt == 0 {
                warn!(path = %path, "Token rejected, refreshing and retrying");
                self.invalidate_token().await;
                continue;
            }
            if !status.is_success() {
                return Err(ApiError::Controller {
                    path: path.to_string(),
                    status: status.as_u16(),
                    message: error_message(&text),
                });
            }

            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| ApiError::Decode {
                path: path.to_string(),
                source: e,
            });
        }
        unreachable!("request loop always returns within two attempts")
    }
}

#[async_trait]
impl ApiClient for HttpClient {
    async fn get(&self, path: &str) -> Result<Document> {
        self.request(Method::GET, path, None).await
    }

    async fn save(&self, path: &str, payload: &Document) -> Result<Document> {
        self.request(Method::POST, path, Some(payload)).await
    }

    async fn update(&self, path: &str, payload: &Document) -> Result<Document> {
        self.request(Method::PUT, path, Some(payload)).await
    }

    async fn delete(&self, path: &str) -> Result<Document> {
        self.request(Method::DELETE, path, None).await
    }

    async fn save_and_trigger(&self, path: &str) -> Result<Document> {
        self.request(Method::POST, path, None).await
    }
}

/// Pull the controller's own `message` field out of an error body, falling
/// back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_message_field() {
        let body = r#"{"message": "VRF already exists", "code": 500}"#;
        assert_eq!(error_message(body), "VRF already exists");
    }

    #[test]
    fn error_message_falls_back_to_raw_body() {
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
        assert_eq!(error_message(r#"{"error": "x"}"#), r#"{"error": "x"}"#);
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let client = HttpClient::new(ClientConfig::new("https://ctrl/", "admin", "pw")).unwrap();
        assert_eq!(client.url("/rest/logon"), "https://ctrl/rest/logon");
    }
}

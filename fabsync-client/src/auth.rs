//! Token lifecycle for the controller session.
//!
//! The controller hands out short-lived tokens on `POST /rest/logon`. The
//! client refreshes them lazily under a mutex so concurrent operations share
//! one login instead of racing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens are considered stale this long before their real expiry so an
/// in-flight request never crosses the boundary.
const EXPIRY_MARGIN_SECS: i64 = 30;

/// Logon request body; lifetime is requested in milliseconds.
#[derive(Debug, Serialize)]
pub struct LogonRequest {
    #[serde(rename = "expirationTime")]
    pub expiration_time: i64,
}

/// Logon response body.
#[derive(Debug, Deserialize)]
pub struct LogonResponse {
    pub token: String,
}

/// A session token plus the instant it stops being usable.
#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(value: String, lifetime_ms: i64) -> Self {
        Self {
            value,
            expires_at: Utc::now() + Duration::milliseconds(lifetime_ms),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

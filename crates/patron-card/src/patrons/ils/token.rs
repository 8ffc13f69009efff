use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::info;

use super::GatewayError;

/// Local lifetime of an ILS bearer token: one minute short of the server's 60 minute TTL.
pub const TOKEN_LIFETIME_MS: i64 = 3_540_000;

/// Bearer token plus the instant it was issued.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    value: String,
    issued_at: DateTime<Utc>,
}

impl BearerToken {
    pub fn new(value: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            issued_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::milliseconds(TOKEN_LIFETIME_MS)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("value", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Anything able to mint a fresh token (the ILS client, or a fake in tests).
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<BearerToken, GatewayError>;
}

/// Process-wide token slot.
///
/// The slot lock is held across the fetch, so callers racing on an expired token queue
/// behind a single refresh and re-check validity once they hold the lock. A failed fetch
/// is returned to the caller that attempted it and leaves the slot empty for the next.
#[derive(Debug, Default)]
pub struct TokenCache {
    slot: Mutex<Option<BearerToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ensure<S>(&self, source: &S) -> Result<BearerToken, GatewayError>
    where
        S: TokenSource + ?Sized,
    {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref() {
            if !token.is_expired_at(Utc::now()) {
                return Ok(token.clone());
            }
        }

        *slot = None;
        let token = source.fetch_token().await?;
        info!(expires_at = %token.expires_at(), "refreshed ILS access token");
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Drops `rejected` if it is still the cached token. A newer token installed by another
    /// caller is left alone.
    pub async fn invalidate(&self, rejected: &BearerToken) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref() == Some(rejected) {
            *slot = None;
        }
    }

    pub async fn current(&self) -> Option<BearerToken> {
        self.slot.lock().await.clone()
    }
}

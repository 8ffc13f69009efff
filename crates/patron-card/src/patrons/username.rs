use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use super::ils::{GatewayError, IdentifierKind, IdentityGateway};

static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]{5,25}$").expect("username regex is valid"));

/// True when `username` passes the local syntax rule (5–25 alphanumerics).
pub fn is_well_formed(username: &str) -> bool {
    USERNAME_PATTERN.is_match(username)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsernameCheck {
    Available,
    Unavailable,
}

impl UsernameCheck {
    pub const fn message(self) -> &'static str {
        match self {
            UsernameCheck::Available => "This username is available.",
            UsernameCheck::Unavailable => "This username is unavailable. Please try another.",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UsernameError {
    #[error("usernames must be 5-25 alphanumeric characters")]
    Invalid,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Local syntax check followed by one availability lookup against the ILS.
#[derive(Clone)]
pub struct UsernameValidator {
    gateway: Arc<dyn IdentityGateway>,
}

impl UsernameValidator {
    pub fn new(gateway: Arc<dyn IdentityGateway>) -> Self {
        Self { gateway }
    }

    pub async fn validate(&self, username: &str) -> Result<UsernameCheck, UsernameError> {
        let username = username.trim();
        if !is_well_formed(username) {
            return Err(UsernameError::Invalid);
        }

        let available = self
            .gateway
            .available(username, IdentifierKind::Username)
            .await?;
        debug!(username, available, "username availability checked");

        Ok(if available {
            UsernameCheck::Available
        } else {
            UsernameCheck::Unavailable
        })
    }
}

//! Gateway to the remote Integrated Library System.
//!
//! [`IdentityGateway`] is the capability the rest of the crate consumes; [`IlsClient`] is
//! the HTTP implementation holding configuration and the shared bearer token.

mod client;
pub mod schema;
pub mod token;

pub use client::IlsClient;
pub use schema::{NewPatron, Patron, PatronUpdate};
pub use token::{BearerToken, TokenCache, TokenSource, TOKEN_LIFETIME_MS};

use async_trait::async_trait;

use super::domain::{Barcode, PatronId, ValidCard, BARCODE_FIELD_TAG, USERNAME_FIELD_TAG};

/// Which identifier a lookup searches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Barcode,
    Username,
}

impl IdentifierKind {
    pub const fn field_tag(self) -> &'static str {
        match self {
            IdentifierKind::Barcode => BARCODE_FIELD_TAG,
            IdentifierKind::Username => USERNAME_FIELD_TAG,
        }
    }
}

/// Failures talking to the ILS.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("patron {identifier} not found")]
    NotFound { identifier: String },
    #[error("duplicate patrons found for varFieldTag[{field_tag}] content {content}")]
    Duplicate { field_tag: String, content: String },
    #[error("ILS rejected {endpoint}: {detail}")]
    BadRequest { endpoint: String, detail: String },
    #[error("ILS unavailable at {endpoint} (status {status:?}): {detail}")]
    Unavailable {
        endpoint: String,
        status: Option<u16>,
        detail: String,
    },
    #[error("unable to obtain ILS access token: {detail}")]
    TokenFetch { detail: String },
    #[error("unexpected ILS response from {endpoint}: {detail}")]
    UnexpectedResponse { endpoint: String, detail: String },
}

impl GatewayError {
    /// True for infrastructure failures that should surface as a 5xx outcome.
    pub fn is_service_unavailable(&self) -> bool {
        matches!(
            self,
            GatewayError::Unavailable { .. }
                | GatewayError::TokenFetch { .. }
                | GatewayError::UnexpectedResponse { .. }
        )
    }
}

/// Patron operations against the ILS.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Looks a patron up by barcode or username. A miss is `Ok(None)`.
    async fn find_patron(
        &self,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<Option<Patron>, GatewayError>;

    /// Creates the remote patron for a validated card and returns its record id.
    async fn create_patron(
        &self,
        card: &ValidCard,
        barcode: &Barcode,
    ) -> Result<PatronId, GatewayError>;

    /// Applies a partial update; used for dependent-link mutations.
    async fn update_patron(&self, id: PatronId, update: &PatronUpdate)
        -> Result<(), GatewayError>;

    /// Whether `identifier` is free to hand out. Duplicate matches count as taken;
    /// infrastructure failures are errors, never "available".
    async fn available(&self, identifier: &str, kind: IdentifierKind) -> Result<bool, GatewayError> {
        match self.find_patron(identifier, kind).await {
            Ok(Some(_)) => Ok(false),
            Ok(None) => Ok(true),
            Err(GatewayError::Duplicate { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

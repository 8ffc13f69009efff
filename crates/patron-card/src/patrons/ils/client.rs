use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, RequestBuilder, Response, StatusCode};
use tracing::{debug, error, warn};

use super::schema::{
    patron_id_from_link, CreatedLink, NewPatron, Patron, PatronUpdate, TokenResponse,
    PATRON_FIELDS,
};
use super::token::{BearerToken, TokenCache, TokenSource};
use super::{GatewayError, IdentifierKind, IdentityGateway};
use crate::config::IlsConfig;
use crate::patrons::domain::{Barcode, PatronId, ValidCard};

/// HTTP client for the ILS patron API.
///
/// Owns the bearer token for the process; clone-free sharing happens through `Arc`.
pub struct IlsClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    tokens: TokenCache,
}

impl std::fmt::Debug for IlsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IlsClient")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl IlsClient {
    pub fn new(config: &IlsConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| GatewayError::UnexpectedResponse {
                endpoint: "client_init".to_string(),
                detail: err.to_string(),
            })?;
        Ok(Self::with_http(http, config))
    }

    pub fn with_http(http: reqwest::Client, config: &IlsConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            tokens: TokenCache::new(),
        }
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Sends an authorized request. A 401 invalidates the token and retries exactly once
    /// with a fresh one; under [`StaleRetry::ServerErrors`] so does a 5xx returned after the
    /// token had already gone stale.
    async fn send<F>(
        &self,
        endpoint: &str,
        retry: StaleRetry,
        build: F,
    ) -> Result<Response, GatewayError>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let token = self.tokens.ensure(self).await?;
        let response = dispatch(endpoint, build(token.value())).await?;

        let status = response.status();
        if !retry.applies(status, token.is_expired_at(Utc::now())) {
            return Ok(response);
        }

        warn!(
            endpoint,
            status = status.as_u16(),
            "ILS rejected request with a stale token; refreshing and retrying once"
        );
        self.tokens.invalidate(&token).await;
        let token = self.tokens.ensure(self).await?;
        dispatch(endpoint, build(token.value())).await
    }
}

/// Which failures earn a single token refresh and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaleRetry {
    Unauthorized,
    /// Also a 5xx that coincided with token expiry. Patron creation only.
    ServerErrors,
}

impl StaleRetry {
    fn applies(self, status: StatusCode, token_expired: bool) -> bool {
        if status == StatusCode::UNAUTHORIZED {
            return true;
        }
        self == StaleRetry::ServerErrors && status.is_server_error() && token_expired
    }
}

async fn dispatch(endpoint: &str, request: RequestBuilder) -> Result<Response, GatewayError> {
    request.send().await.map_err(|err| {
        error!(endpoint, error = %err, "ILS transport failure");
        GatewayError::Unavailable {
            endpoint: endpoint.to_string(),
            status: err.status().map(|status| status.as_u16()),
            detail: err.to_string(),
        }
    })
}

/// Maps a non-success response that no caller treats specially.
async fn failure(endpoint: &str, response: Response) -> GatewayError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::BAD_REQUEST {
        return GatewayError::BadRequest {
            endpoint: endpoint.to_string(),
            detail: body,
        };
    }

    error!(endpoint, status = status.as_u16(), body = %body, "ILS request failed");
    if status.is_server_error() {
        GatewayError::Unavailable {
            endpoint: endpoint.to_string(),
            status: Some(status.as_u16()),
            detail: body,
        }
    } else {
        GatewayError::UnexpectedResponse {
            endpoint: endpoint.to_string(),
            detail: format!("status {}: {}", status.as_u16(), body),
        }
    }
}

#[async_trait]
impl TokenSource for IlsClient {
    async fn fetch_token(&self) -> Result<BearerToken, GatewayError> {
        let url = self.url("token");
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|err| {
                error!(error = %err, "ILS token request failed");
                GatewayError::TokenFetch {
                    detail: err.to_string(),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!(status, body = %body, "ILS token endpoint refused credentials");
            return Err(GatewayError::TokenFetch {
                detail: format!("status {status}: {body}"),
            });
        }

        let TokenResponse { access_token } =
            response
                .json()
                .await
                .map_err(|err| GatewayError::TokenFetch {
                    detail: err.to_string(),
                })?;
        Ok(BearerToken::new(access_token, Utc::now()))
    }
}

#[async_trait]
impl IdentityGateway for IlsClient {
    async fn find_patron(
        &self,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<Option<Patron>, GatewayError> {
        let endpoint = "GET /patrons/find";
        let url = self.url("patrons/find");
        let query = [
            ("varFieldTag", kind.field_tag()),
            ("varFieldContent", identifier),
            ("fields", PATRON_FIELDS),
        ];

        let response = self
            .send(endpoint, StaleRetry::Unauthorized, |token| {
                self.http.get(&url).bearer_auth(token).query(&query)
            })
            .await?;

        match response.status() {
            status if status.is_success() => response
                .json::<Patron>()
                .await
                .map(Some)
                .map_err(|err| GatewayError::UnexpectedResponse {
                    endpoint: endpoint.to_string(),
                    detail: err.to_string(),
                }),
            StatusCode::NOT_FOUND => {
                let body = response.text().await.unwrap_or_default();
                if body.to_ascii_lowercase().contains("not found") {
                    Ok(None)
                } else {
                    error!(endpoint, body = %body, "ILS returned 404 without a record-not-found body");
                    Err(GatewayError::UnexpectedResponse {
                        endpoint: endpoint.to_string(),
                        detail: format!("status 404: {body}"),
                    })
                }
            }
            StatusCode::CONFLICT => {
                warn!(
                    field_tag = kind.field_tag(),
                    identifier, "ILS holds duplicate patrons for identifier"
                );
                Err(GatewayError::Duplicate {
                    field_tag: kind.field_tag().to_string(),
                    content: identifier.to_string(),
                })
            }
            _ => Err(failure(endpoint, response).await),
        }
    }

    async fn create_patron(
        &self,
        card: &ValidCard,
        barcode: &Barcode,
    ) -> Result<PatronId, GatewayError> {
        let endpoint = "POST /patrons";
        let url = self.url("patrons");
        let body = NewPatron::from_card(card, barcode);

        let response = self
            .send(endpoint, StaleRetry::ServerErrors, |token| {
                self.http.post(&url).bearer_auth(token).json(&body)
            })
            .await?;

        if !response.status().is_success() {
            return Err(failure(endpoint, response).await);
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let link = match response.json::<CreatedLink>().await {
            Ok(created) => Some(created.link),
            Err(err) => {
                debug!(error = %err, "create response carried no link body");
                location
            }
        };

        link.as_deref()
            .and_then(patron_id_from_link)
            .ok_or_else(|| GatewayError::UnexpectedResponse {
                endpoint: endpoint.to_string(),
                detail: format!("no patron id in created link {link:?}"),
            })
    }

    async fn update_patron(
        &self,
        id: PatronId,
        update: &PatronUpdate,
    ) -> Result<(), GatewayError> {
        let endpoint = "PUT /patrons/{id}";
        let url = self.url(&format!("patrons/{id}"));

        let response = self
            .send(endpoint, StaleRetry::Unauthorized, |token| {
                self.http.put(&url).bearer_auth(token).json(update)
            })
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            status if status.is_success() => {
                debug!(%id, status = status.as_u16(), "ILS update returned a body");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound {
                identifier: id.to_string(),
            }),
            _ => Err(failure(endpoint, response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_always_earns_a_retry() {
        for retry in [StaleRetry::Unauthorized, StaleRetry::ServerErrors] {
            assert!(retry.applies(StatusCode::UNAUTHORIZED, false));
            assert!(retry.applies(StatusCode::UNAUTHORIZED, true));
        }
    }

    #[test]
    fn stale_server_errors_retry_only_for_creation() {
        let status = StatusCode::SERVICE_UNAVAILABLE;
        assert!(StaleRetry::ServerErrors.applies(status, true));
        assert!(!StaleRetry::ServerErrors.applies(status, false));
        assert!(!StaleRetry::Unauthorized.applies(status, true));
    }

    #[test]
    fn client_errors_never_retry() {
        assert!(!StaleRetry::ServerErrors.applies(StatusCode::BAD_REQUEST, true));
        assert!(!StaleRetry::Unauthorized.applies(StatusCode::NOT_FOUND, true));
    }
}

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::address::{AddressVendorError, AddressVerdict};
use super::barcode::{AlertPublisher, AllocationError, BarcodeStore};
use super::dependents::{DependentError, Eligibility, LinkError};
use super::domain::{Address, Card};
use super::ils::GatewayError;
use super::service::{CardIssuanceService, DependentRequest, IssuanceError};
use super::username::{UsernameCheck, UsernameError};
use super::validation::PipelineError;

/// Router exposing card issuance and the standalone validation checks.
pub fn patron_router<S, A>(service: Arc<CardIssuanceService<S, A>>) -> Router
where
    S: BarcodeStore + 'static,
    A: AlertPublisher + 'static,
{
    Router::new()
        .route("/api/v1/patrons", post(create_patron_handler::<S, A>))
        .route(
            "/api/v1/patrons/dependents",
            post(create_dependent_handler::<S, A>),
        )
        .route(
            "/api/v1/patrons/dependent-eligibility",
            get(dependent_eligibility_handler::<S, A>),
        )
        .route(
            "/api/v1/validations/username",
            post(username_handler::<S, A>),
        )
        .route("/api/v1/validations/address", post(address_handler::<S, A>))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct EligibilityQuery {
    #[serde(default)]
    barcode: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UsernameRequest {
    username: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddressRequest {
    address: Address,
}

pub(crate) async fn create_patron_handler<S, A>(
    State(service): State<Arc<CardIssuanceService<S, A>>>,
    axum::Json(card): axum::Json<Card>,
) -> Response
where
    S: BarcodeStore + 'static,
    A: AlertPublisher + 'static,
{
    match service.create_patron(card).await {
        Ok(created) => (StatusCode::CREATED, axum::Json(created)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn create_dependent_handler<S, A>(
    State(service): State<Arc<CardIssuanceService<S, A>>>,
    axum::Json(request): axum::Json<DependentRequest>,
) -> Response
where
    S: BarcodeStore + 'static,
    A: AlertPublisher + 'static,
{
    match service.create_dependent(request).await {
        Ok(created) => (StatusCode::CREATED, axum::Json(created)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn dependent_eligibility_handler<S, A>(
    State(service): State<Arc<CardIssuanceService<S, A>>>,
    Query(query): Query<EligibilityQuery>,
) -> Response
where
    S: BarcodeStore + 'static,
    A: AlertPublisher + 'static,
{
    match service.dependent_eligibility(&query.barcode).await {
        Ok(eligibility) => {
            let payload = match &eligibility {
                Eligibility::Eligible { dependents, .. } => json!({
                    "eligible": true,
                    "description": eligibility.description(),
                    "dependents": dependents.barcodes(),
                }),
                Eligibility::Ineligible { reason } => json!({
                    "eligible": false,
                    "description": eligibility.description(),
                    "reason": reason,
                }),
            };
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn username_handler<S, A>(
    State(service): State<Arc<CardIssuanceService<S, A>>>,
    axum::Json(request): axum::Json<UsernameRequest>,
) -> Response
where
    S: BarcodeStore + 'static,
    A: AlertPublisher + 'static,
{
    match service.validate_username(&request.username).await {
        Ok(check) => {
            let kind = match check {
                UsernameCheck::Available => "available-username",
                UsernameCheck::Unavailable => "unavailable-username",
            };
            let payload = json!({ "type": kind, "message": check.message() });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn address_handler<S, A>(
    State(service): State<Arc<CardIssuanceService<S, A>>>,
    axum::Json(request): axum::Json<AddressRequest>,
) -> Response
where
    S: BarcodeStore + 'static,
    A: AlertPublisher + 'static,
{
    match service.validate_address(&request.address).await {
        Ok(AddressVerdict::Valid(address)) => {
            let payload = json!({
                "type": "valid-address",
                "message": "Address has been validated.",
                "address": address,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Ok(AddressVerdict::Alternate(addresses)) => {
            let payload = json!({
                "type": "alternate-addresses",
                "message": "Alternate addresses have been identified.",
                "addresses": addresses,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Ok(AddressVerdict::Unrecognized { code, detail }) => {
            let payload = json!({
                "type": "unrecognized-address",
                "message": detail,
                "code": code,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

fn error_body(status: StatusCode, kind: &str, message: String, details: serde_json::Value) -> Response {
    let payload = json!({
        "error": message,
        "type": kind,
        "details": details,
    });
    (status, axum::Json(payload)).into_response()
}

fn gateway_status(err: &GatewayError) -> (StatusCode, &'static str) {
    match err {
        GatewayError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "ils-bad-request"),
        GatewayError::NotFound { .. } => (StatusCode::NOT_FOUND, "not-found"),
        GatewayError::Duplicate { .. } => (StatusCode::CONFLICT, "duplicate-patron"),
        GatewayError::Unavailable { .. } | GatewayError::TokenFetch { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "ils-unavailable")
        }
        GatewayError::UnexpectedResponse { .. } => (StatusCode::BAD_GATEWAY, "ils-integration-error"),
    }
}

fn address_status(err: &AddressVendorError) -> (StatusCode, &'static str) {
    match err {
        AddressVendorError::Transport(_) | AddressVendorError::Status { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "address-service-unavailable")
        }
        AddressVendorError::Authorization { .. }
        | AddressVendorError::Integration { .. }
        | AddressVendorError::Deserialization(_) => {
            (StatusCode::BAD_GATEWAY, "address-service-error")
        }
    }
}

impl IntoResponse for IssuanceError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let none = serde_json::Value::Null;
        let (status, kind, details) = match &self {
            IssuanceError::Pipeline(PipelineError::TermsNotAccepted) => {
                (StatusCode::BAD_REQUEST, "terms-not-accepted", none)
            }
            IssuanceError::Pipeline(PipelineError::MissingFields(fields)) => (
                StatusCode::BAD_REQUEST,
                "missing-required-fields",
                json!({ "fields": fields }),
            ),
            IssuanceError::Invalid { errors, alternates } => (
                StatusCode::BAD_REQUEST,
                "invalid-request",
                json!({ "fields": errors, "addressAlternates": alternates }),
            ),
            IssuanceError::Ineligible(reason) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "ineligible",
                json!({ "reason": reason }),
            ),
            IssuanceError::Dependent(
                DependentError::MissingIdentifier | DependentError::InvalidBarcode(_),
            ) => (StatusCode::BAD_REQUEST, "invalid-barcode", none),
            IssuanceError::Dependent(DependentError::ParentNotFound(barcode)) => (
                StatusCode::NOT_FOUND,
                "parent-not-found",
                json!({ "barcode": barcode }),
            ),
            IssuanceError::Dependent(DependentError::Link(LinkError::CapReached))
            | IssuanceError::Dependent(DependentError::Link(LinkError::AlreadyLinked(_))) => {
                (StatusCode::CONFLICT, "dependent-link-conflict", none)
            }
            IssuanceError::Username(UsernameError::Invalid) => (
                StatusCode::BAD_REQUEST,
                "invalid-username",
                json!({ "fields": { "username": message } }),
            ),
            IssuanceError::Pipeline(PipelineError::Identity(err))
            | IssuanceError::Dependent(DependentError::Gateway(err))
            | IssuanceError::Allocation(AllocationError::Gateway(err))
            | IssuanceError::Username(UsernameError::Gateway(err))
            | IssuanceError::Gateway(err) => {
                let (status, kind) = gateway_status(err);
                (status, kind, none)
            }
            IssuanceError::Pipeline(PipelineError::AddressService(err))
            | IssuanceError::Address(err) => {
                let (status, kind) = address_status(err);
                (status, kind, none)
            }
            IssuanceError::Allocation(AllocationError::Exhausted { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "barcodes-exhausted", none)
            }
            IssuanceError::Allocation(AllocationError::Contended { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "barcodes-contended", none)
            }
            IssuanceError::Allocation(AllocationError::Store(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "barcode-store-unavailable", none)
            }
            IssuanceError::LinkFailed { id, barcode, .. } => (
                StatusCode::BAD_GATEWAY,
                "dependent-link-failed",
                json!({ "patronId": id, "barcode": barcode }),
            ),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), kind, error = %message, "request failed");
        }
        error_body(status, kind, message, details)
    }
}

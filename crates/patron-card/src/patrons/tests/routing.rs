use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use super::common::*;
use crate::patrons::address::AddressVerdict;
use crate::patrons::barcode::InMemoryBarcodeStore;
use crate::patrons::domain::{Card, VarField};

const PARENT: &str = "28888055432443";

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

#[tokio::test]
async fn create_route_returns_created_patron() {
    let router = router_for(harness());

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/patrons",
            serde_json::to_value(web_card()).expect("card serializes"),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["ptype"], json!(9));
    assert_eq!(payload["username"], json!("janereader"));
    assert_eq!(payload["barcode"].as_str().map(str::len), Some(14));
}

#[tokio::test]
async fn create_handler_reports_field_errors() {
    let harness = harness();
    let service = Arc::new(harness.service);
    let card = Card {
        email: "nope".to_string(),
        ..web_card()
    };

    let response = crate::patrons::router::create_patron_handler::<
        InMemoryBarcodeStore,
        MemoryAlerts,
    >(State(service), axum::Json(card))
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert_eq!(payload["type"], json!("invalid-request"));
    assert!(payload["details"]["fields"]["email"].is_string());
}

#[tokio::test]
async fn create_handler_rejects_unaccepted_terms() {
    let service = Arc::new(harness().service);
    let card = Card {
        accept_terms: false,
        ..web_card()
    };

    let response = crate::patrons::router::create_patron_handler::<
        InMemoryBarcodeStore,
        MemoryAlerts,
    >(State(service), axum::Json(card))
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert_eq!(payload["type"], json!("terms-not-accepted"));
}

#[tokio::test]
async fn ils_outage_maps_to_service_unavailable() {
    let harness = harness();
    harness.gateway.fail_finds.store(true, Ordering::SeqCst);
    let router = router_for(harness);

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/validations/username",
            json!({ "username": "freshname" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let payload = read_json_body(response).await;
    assert_eq!(payload["type"], json!("ils-unavailable"));
}

#[tokio::test]
async fn username_route_reports_availability() {
    let harness = harness();
    harness.gateway.take_username("takenname");
    let router = router_for(harness);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/validations/username",
            json!({ "username": "takenname" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_json_body(response).await["type"],
        json!("unavailable-username")
    );

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/validations/username",
            json!({ "username": "bad name" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn address_route_surfaces_vendor_description() {
    let router = router_for(harness_with(AddressScript::Fixed(
        AddressVerdict::Unrecognized {
            code: "7".to_string(),
            detail: "Street not found.".to_string(),
        },
    )));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/validations/address",
            json!({ "address": city_address() }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["type"], json!("unrecognized-address"));
    assert_eq!(payload["message"], json!("Street not found."));
}

#[tokio::test]
async fn eligibility_route_distinguishes_outcomes() {
    let harness = harness();
    harness.gateway.insert_patron(parent_patron(
        42,
        PARENT,
        vec![VarField::new(
            "x",
            "DEPENDENTS 11111111111111,22222222222222,33333333333333",
        )],
    ));
    let router = router_for(harness);

    let response = router
        .clone()
        .oneshot(
            Request::get(format!(
                "/api/v1/patrons/dependent-eligibility?barcode={PARENT}"
            ))
            .body(Body::empty())
            .expect("request builds"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["eligible"], json!(false));
    assert_eq!(payload["reason"], json!("limit_reached"));

    let response = router
        .clone()
        .oneshot(
            Request::get("/api/v1/patrons/dependent-eligibility?barcode=28888000000000")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .oneshot(
            Request::get("/api/v1/patrons/dependent-eligibility")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dependent_route_creates_and_links() {
    let harness = harness();
    harness
        .gateway
        .insert_patron(parent_patron(42, PARENT, Vec::new()));
    let router = router_for(harness);

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/patrons/dependents",
            json!({
                "parentBarcode": PARENT,
                "name": "Sam Reader",
                "username": "samreader",
                "pin": "4321",
                "acceptTerms": true
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["ptype"], json!(4));
    assert_eq!(payload["parentBarcode"], json!(PARENT));
}

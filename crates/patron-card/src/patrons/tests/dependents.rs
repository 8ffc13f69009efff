use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::common::*;
use crate::patrons::dependents::{
    DependentAccounts, DependentError, Eligibility, IneligibleReason, LinkError,
};
use crate::patrons::domain::{Barcode, PatronId, VarField};
use crate::patrons::ils::GatewayError;

const PARENT: &str = "28888055432443";

fn accounts_with(patron: crate::patrons::ils::Patron) -> (DependentAccounts, Arc<MemoryGateway>) {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.insert_patron(patron);
    (DependentAccounts::new(gateway.clone()), gateway)
}

fn reason(eligibility: Eligibility) -> IneligibleReason {
    match eligibility {
        Eligibility::Ineligible { reason } => reason,
        Eligibility::Eligible { .. } => panic!("expected ineligible"),
    }
}

#[tokio::test]
async fn parent_with_two_dependents_can_add_a_third_then_not_a_fourth() {
    let (accounts, gateway) = accounts_with(parent_patron(
        42,
        PARENT,
        vec![VarField::new(
            "x",
            "DEPENDENTS 11111111111111,22222222222222",
        )],
    ));

    let eligibility = accounts.check(PARENT, today()).await.expect("check runs");
    assert!(eligibility.is_eligible());

    let links = accounts
        .link_dependent(PARENT, &Barcode("33333333333333".to_string()))
        .await
        .expect("links third dependent");
    assert_eq!(links.len(), 3);

    let updates = gateway.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, PatronId(42));
    assert_eq!(
        updates[0].1.var_fields,
        vec![VarField::new(
            "x",
            "DEPENDENTS 11111111111111,22222222222222,33333333333333"
        )]
    );

    let eligibility = accounts.check(PARENT, today()).await.expect("check runs");
    assert_eq!(reason(eligibility), IneligibleReason::LimitReached);

    let fourth = accounts
        .link_dependent(PARENT, &Barcode("44444444444444".to_string()))
        .await;
    assert!(matches!(
        fourth,
        Err(DependentError::Link(LinkError::CapReached))
    ));
    assert_eq!(gateway.updates().len(), 1);
}

#[tokio::test]
async fn first_link_creates_field_beside_unrelated_notes() {
    let (accounts, gateway) = accounts_with(parent_patron(
        42,
        PARENT,
        vec![VarField::new("x", "Prefers large print")],
    ));

    accounts
        .link_dependent(PARENT, &Barcode("11111111111111".to_string()))
        .await
        .expect("links");

    let parent = gateway.patron(PatronId(42)).expect("parent");
    assert_eq!(
        parent.var_fields,
        vec![
            VarField::new("x", "Prefers large print"),
            VarField::new("x", "DEPENDENTS 11111111111111"),
        ]
    );
}

#[tokio::test]
async fn legacy_seven_digit_barcode_is_ineligible_without_lookup() {
    let gateway = Arc::new(MemoryGateway::new());
    let accounts = DependentAccounts::new(gateway.clone());

    let eligibility = accounts.check("1234567", today()).await.expect("check runs");
    assert_eq!(reason(eligibility), IneligibleReason::LegacyBarcode);
    assert_eq!(gateway.find_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_barcodes_are_errors() {
    let accounts = DependentAccounts::new(Arc::new(MemoryGateway::new()));

    assert!(matches!(
        accounts.check("   ", today()).await,
        Err(DependentError::MissingIdentifier)
    ));
    assert!(matches!(
        accounts.check("123456789012", today()).await,
        Err(DependentError::InvalidBarcode(_))
    ));
    assert!(matches!(
        accounts.check("2888805543244X", today()).await,
        Err(DependentError::InvalidBarcode(_))
    ));
}

#[tokio::test]
async fn unknown_parent_is_an_error_not_ineligibility() {
    let accounts = DependentAccounts::new(Arc::new(MemoryGateway::new()));
    assert!(matches!(
        accounts.check(PARENT, today()).await,
        Err(DependentError::ParentNotFound(_))
    ));
}

#[tokio::test]
async fn expired_parent_is_ineligible() {
    let mut parent = parent_patron(42, PARENT, Vec::new());
    parent.expiration_date = Some(date(2025, 5, 31));
    let (accounts, _) = accounts_with(parent);

    let eligibility = accounts.check(PARENT, today()).await.expect("check runs");
    assert_eq!(reason(eligibility), IneligibleReason::Expired);
}

#[tokio::test]
async fn parent_expiring_today_is_still_eligible() {
    let mut parent = parent_patron(42, PARENT, Vec::new());
    parent.expiration_date = Some(today());
    let (accounts, _) = accounts_with(parent);

    assert!(accounts
        .check(PARENT, today())
        .await
        .expect("check runs")
        .is_eligible());
}

#[tokio::test]
async fn ptype_outside_allow_list_is_ineligible() {
    for ptype in [4u16, 5, 7] {
        let mut parent = parent_patron(42, PARENT, Vec::new());
        parent.patron_type = Some(ptype);
        let (accounts, _) = accounts_with(parent);

        let eligibility = accounts.check(PARENT, today()).await.expect("check runs");
        assert_eq!(reason(eligibility), IneligibleReason::PtypeNotAllowed, "ptype {ptype}");
    }
}

#[tokio::test]
async fn ils_outage_is_a_service_error() {
    let (accounts, gateway) = accounts_with(parent_patron(42, PARENT, Vec::new()));
    gateway.fail_finds.store(true, Ordering::SeqCst);

    assert!(matches!(
        accounts.check(PARENT, today()).await,
        Err(DependentError::Gateway(GatewayError::Unavailable { .. }))
    ));
}

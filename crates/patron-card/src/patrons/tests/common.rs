use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::patrons::address::{AddressValidator, AddressVendorError, AddressVerdict, VENDOR_TAG};
use crate::patrons::barcode::{AlertError, AlertPublisher, InMemoryBarcodeStore, SupplyAlert};
use crate::patrons::domain::{
    Address, Barcode, Card, DeclaredLocation, PatronId, PolicyType, ValidCard, VarField,
};
use crate::patrons::ils::schema::PatronAddress;
use crate::patrons::ils::{
    GatewayError, IdentifierKind, IdentityGateway, NewPatron, Patron, PatronUpdate,
};
use crate::patrons::service::{CardIssuanceService, IssuanceSettings};

pub(super) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date")
}

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn city_address() -> Address {
    Address {
        line1: "476 5th Ave".to_string(),
        city: "New York".to_string(),
        county: Some("New York".to_string()),
        state: "NY".to_string(),
        zip: "10018".to_string(),
        ..Address::default()
    }
}

pub(super) fn upstate_address() -> Address {
    Address {
        line1: "10 Eagle St".to_string(),
        city: "Albany".to_string(),
        county: Some("Albany".to_string()),
        state: "NY".to_string(),
        zip: "12207".to_string(),
        ..Address::default()
    }
}

pub(super) fn out_of_state_address() -> Address {
    Address {
        line1: "1 Market St".to_string(),
        city: "Philadelphia".to_string(),
        county: Some("Philadelphia".to_string()),
        state: "PA".to_string(),
        zip: "19106".to_string(),
        ..Address::default()
    }
}

pub(super) fn vendor_copy(address: &Address) -> Address {
    Address {
        is_residential: Some(true),
        has_been_validated: true,
        validated_by: Some(VENDOR_TAG.to_string()),
        ..address.clone()
    }
}

pub(super) fn web_card() -> Card {
    Card {
        name: "Jane Q Reader".to_string(),
        address: city_address(),
        username: "janereader".to_string(),
        pin: "1234".to_string(),
        email: "jane@example.org".to_string(),
        birthdate: Some(date(1990, 4, 2)),
        age_gate: true,
        policy_type: PolicyType::WebApplicant,
        location: Some(DeclaredLocation::City),
        accept_terms: true,
        ..Card::default()
    }
}

pub(super) fn standard_card() -> Card {
    Card {
        policy_type: PolicyType::StandardResident,
        age_gate: false,
        ..web_card()
    }
}

pub(super) fn parent_patron(id: u64, barcode: &str, var_fields: Vec<VarField>) -> Patron {
    Patron {
        id: PatronId(id),
        names: vec!["READER, JANE Q".to_string()],
        barcodes: vec![barcode.to_string()],
        expiration_date: Some(date(2027, 1, 1)),
        birth_date: Some(date(1990, 4, 2)),
        emails: vec!["jane@example.org".to_string()],
        patron_type: Some(2),
        addresses: vec![PatronAddress {
            lines: vec!["476 5TH AVE".to_string(), "NEW YORK, NY 10018".to_string()],
            kind: "a".to_string(),
        }],
        var_fields,
    }
}

/// In-memory ILS double recording every create and update.
#[derive(Default)]
pub(super) struct MemoryGateway {
    patrons: Mutex<Vec<Patron>>,
    taken_usernames: Mutex<HashSet<String>>,
    taken_barcodes: Mutex<HashSet<String>>,
    created: Mutex<Vec<NewPatron>>,
    updates: Mutex<Vec<(PatronId, PatronUpdate)>>,
    next_id: AtomicU64,
    pub(super) find_calls: AtomicUsize,
    pub(super) find_delay_ms: AtomicU64,
    pub(super) fail_finds: AtomicBool,
    pub(super) fail_creates: AtomicBool,
    pub(super) fail_updates: AtomicBool,
}

impl MemoryGateway {
    pub(super) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1_000_001),
            ..Self::default()
        }
    }

    pub(super) fn insert_patron(&self, patron: Patron) {
        self.patrons
            .lock()
            .expect("gateway mutex poisoned")
            .push(patron);
    }

    pub(super) fn take_username(&self, username: &str) {
        self.taken_usernames
            .lock()
            .expect("gateway mutex poisoned")
            .insert(username.to_string());
    }

    pub(super) fn take_barcode(&self, barcode: &str) {
        self.taken_barcodes
            .lock()
            .expect("gateway mutex poisoned")
            .insert(barcode.to_string());
    }

    pub(super) fn created(&self) -> Vec<NewPatron> {
        self.created.lock().expect("gateway mutex poisoned").clone()
    }

    pub(super) fn updates(&self) -> Vec<(PatronId, PatronUpdate)> {
        self.updates.lock().expect("gateway mutex poisoned").clone()
    }

    pub(super) fn patron(&self, id: PatronId) -> Option<Patron> {
        self.patrons
            .lock()
            .expect("gateway mutex poisoned")
            .iter()
            .find(|patron| patron.id == id)
            .cloned()
    }

    fn stub(identifier: &str) -> Patron {
        Patron {
            id: PatronId(1),
            names: Vec::new(),
            barcodes: vec![identifier.to_string()],
            expiration_date: None,
            birth_date: None,
            emails: Vec::new(),
            patron_type: None,
            addresses: Vec::new(),
            var_fields: Vec::new(),
        }
    }

    fn unavailable(endpoint: &str) -> GatewayError {
        GatewayError::Unavailable {
            endpoint: endpoint.to_string(),
            status: Some(503),
            detail: "ILS offline".to_string(),
        }
    }
}

#[async_trait]
impl IdentityGateway for MemoryGateway {
    async fn find_patron(
        &self,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<Option<Patron>, GatewayError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.find_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_finds.load(Ordering::SeqCst) {
            return Err(Self::unavailable("GET /patrons/find"));
        }

        let taken = match kind {
            IdentifierKind::Username => &self.taken_usernames,
            IdentifierKind::Barcode => &self.taken_barcodes,
        };
        if taken
            .lock()
            .expect("gateway mutex poisoned")
            .contains(identifier)
        {
            return Ok(Some(Self::stub(identifier)));
        }

        let patrons = self.patrons.lock().expect("gateway mutex poisoned");
        Ok(patrons
            .iter()
            .find(|patron| match kind {
                IdentifierKind::Barcode => patron.barcodes.iter().any(|b| b == identifier),
                IdentifierKind::Username => patron
                    .var_fields
                    .iter()
                    .any(|field| field.field_tag == kind.field_tag() && field.content == identifier),
            })
            .cloned())
    }

    async fn create_patron(
        &self,
        card: &ValidCard,
        barcode: &Barcode,
    ) -> Result<PatronId, GatewayError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Self::unavailable("POST /patrons"));
        }

        let body = NewPatron::from_card(card, barcode);
        let id = PatronId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.insert_patron(Patron {
            id,
            names: body.names.clone(),
            barcodes: body.barcodes.clone(),
            expiration_date: Some(body.expiration_date),
            birth_date: body.birth_date,
            emails: body.emails.clone(),
            patron_type: Some(body.patron_type),
            addresses: body.addresses.clone(),
            var_fields: body.var_fields.clone(),
        });
        self.created
            .lock()
            .expect("gateway mutex poisoned")
            .push(body);
        Ok(id)
    }

    async fn update_patron(&self, id: PatronId, update: &PatronUpdate) -> Result<(), GatewayError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::unavailable("PUT /patrons/{id}"));
        }

        let mut patrons = self.patrons.lock().expect("gateway mutex poisoned");
        let patron = patrons
            .iter_mut()
            .find(|patron| patron.id == id)
            .ok_or_else(|| GatewayError::NotFound {
                identifier: id.to_string(),
            })?;
        patron.var_fields = update.var_fields.clone();
        self.updates
            .lock()
            .expect("gateway mutex poisoned")
            .push((id, update.clone()));
        Ok(())
    }
}

pub(super) enum AddressScript {
    /// Returns the submitted address as a validated residential vendor copy.
    Echo,
    Fixed(AddressVerdict),
    Fail,
}

/// Address validator double driven by a script.
pub(super) struct ScriptedAddresses {
    script: AddressScript,
    pub(super) calls: AtomicUsize,
}

impl ScriptedAddresses {
    pub(super) fn new(script: AddressScript) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub(super) fn echo() -> Self {
        Self::new(AddressScript::Echo)
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressValidator for ScriptedAddresses {
    async fn validate(&self, address: &Address) -> Result<AddressVerdict, AddressVendorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            AddressScript::Echo => Ok(AddressVerdict::Valid(vendor_copy(address))),
            AddressScript::Fixed(verdict) => Ok(verdict.clone()),
            AddressScript::Fail => Err(AddressVendorError::Authorization {
                detail: "Please provide a valid license key for this web service.".to_string(),
            }),
        }
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryAlerts {
    events: Arc<Mutex<Vec<SupplyAlert>>>,
}

impl MemoryAlerts {
    pub(super) fn events(&self) -> Vec<SupplyAlert> {
        self.events.lock().expect("alert mutex poisoned").clone()
    }
}

impl AlertPublisher for MemoryAlerts {
    fn publish(&self, alert: SupplyAlert) -> Result<(), AlertError> {
        self.events
            .lock()
            .expect("alert mutex poisoned")
            .push(alert);
        Ok(())
    }
}

pub(super) struct Harness {
    pub(super) service: CardIssuanceService<InMemoryBarcodeStore, MemoryAlerts>,
    pub(super) gateway: Arc<MemoryGateway>,
    pub(super) addresses: Arc<ScriptedAddresses>,
    pub(super) store: Arc<InMemoryBarcodeStore>,
    pub(super) alerts: Arc<MemoryAlerts>,
}

pub(super) fn harness_with(script: AddressScript) -> Harness {
    let gateway = Arc::new(MemoryGateway::new());
    let addresses = Arc::new(ScriptedAddresses::new(script));
    let store = Arc::new(InMemoryBarcodeStore::new());
    let alerts = Arc::new(MemoryAlerts::default());
    let service = CardIssuanceService::new(
        gateway.clone(),
        addresses.clone(),
        store.clone(),
        alerts.clone(),
        IssuanceSettings::default(),
    )
    .with_today(today);

    Harness {
        service,
        gateway,
        addresses,
        store,
        alerts,
    }
}

pub(super) fn harness() -> Harness {
    harness_with(AddressScript::Echo)
}

pub(super) async fn read_json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn router_for(harness: Harness) -> axum::Router {
    crate::patrons::router::patron_router(Arc::new(harness.service))
}

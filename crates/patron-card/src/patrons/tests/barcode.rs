use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::common::*;
use crate::patrons::barcode::{
    AllocationError, BarcodeAllocator, BarcodeFamily, BarcodeRecord, BarcodeStore,
    InMemoryBarcodeStore, StoreError,
};
use crate::patrons::domain::Barcode;
use crate::patrons::luhn::luhn_validate;

fn allocator(
    store: Arc<InMemoryBarcodeStore>,
    gateway: Arc<MemoryGateway>,
    alerts: Arc<MemoryAlerts>,
    max_attempts: u32,
) -> BarcodeAllocator<InMemoryBarcodeStore, MemoryAlerts> {
    BarcodeAllocator::new(store, gateway, alerts, max_attempts)
}

fn family() -> BarcodeFamily {
    BarcodeFamily::new("28888", 14)
}

/// Ledger that lets a rival allocator win the next `rival_wins` fresh inserts and can be
/// told to fail releases.
#[derive(Default)]
struct RivalledStore {
    inner: InMemoryBarcodeStore,
    rival_wins: AtomicU32,
    fail_release: AtomicBool,
}

#[async_trait]
impl BarcodeStore for RivalledStore {
    async fn lowest_unused(&self, family: &BarcodeFamily) -> Result<Option<Barcode>, StoreError> {
        self.inner.lowest_unused(family).await
    }

    async fn highest(&self, family: &BarcodeFamily) -> Result<Option<Barcode>, StoreError> {
        self.inner.highest(family).await
    }

    async fn claim(&self, barcode: &Barcode) -> Result<bool, StoreError> {
        self.inner.claim(barcode).await
    }

    async fn insert_used(&self, barcode: &Barcode) -> Result<bool, StoreError> {
        let rival = self
            .rival_wins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |wins| wins.checked_sub(1))
            .is_ok();
        if rival {
            self.inner.insert_used(barcode).await?;
            return Ok(false);
        }
        self.inner.insert_used(barcode).await
    }

    async fn release(&self, barcode: &Barcode) -> Result<(), StoreError> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.release(barcode).await
    }

    async fn record(&self, barcode: &Barcode) -> Result<Option<BarcodeRecord>, StoreError> {
        self.inner.record(barcode).await
    }
}

#[tokio::test]
async fn empty_store_hands_out_the_family_seed() {
    let store = Arc::new(InMemoryBarcodeStore::new());
    let allocator = allocator(
        store.clone(),
        Arc::new(MemoryGateway::new()),
        Arc::new(MemoryAlerts::default()),
        3,
    );

    let barcode = allocator.allocate(&family()).await.expect("allocates");
    assert_eq!(barcode, family().seed().expect("seed"));
    assert!(luhn_validate(barcode.as_str()));
    let record = store.record(&barcode).await.expect("read").expect("row");
    assert!(record.used);
}

#[tokio::test]
async fn next_barcode_extends_the_highest_with_fresh_check_digit() {
    let store = Arc::new(InMemoryBarcodeStore::new());
    store.seed("28888055432443", true).await;
    let allocator = allocator(
        store,
        Arc::new(MemoryGateway::new()),
        Arc::new(MemoryAlerts::default()),
        3,
    );

    let barcode = allocator.allocate(&family()).await.expect("allocates");
    assert!(barcode.as_str().starts_with("2888805543245"));
    assert!(luhn_validate(barcode.as_str()));
}

#[tokio::test]
async fn released_barcodes_are_reused_lowest_first() {
    let store = Arc::new(InMemoryBarcodeStore::new());
    let low = family().barcode_for(10).expect("barcode");
    let high = family().barcode_for(20).expect("barcode");
    store.seed(high.as_str(), false).await;
    store.seed(low.as_str(), false).await;
    store
        .seed(family().barcode_for(30).expect("barcode").as_str(), true)
        .await;

    let allocator = allocator(
        store,
        Arc::new(MemoryGateway::new()),
        Arc::new(MemoryAlerts::default()),
        3,
    );
    assert_eq!(allocator.allocate(&family()).await.expect("first"), low);
    assert_eq!(allocator.allocate(&family()).await.expect("second"), high);
}

#[tokio::test]
async fn remotely_taken_candidates_are_skipped_and_stay_used() {
    let store = Arc::new(InMemoryBarcodeStore::new());
    let gateway = Arc::new(MemoryGateway::new());
    let seed = family().seed().expect("seed");
    gateway.take_barcode(seed.as_str());

    let allocator = allocator(
        store.clone(),
        gateway,
        Arc::new(MemoryAlerts::default()),
        3,
    );
    let barcode = allocator.allocate(&family()).await.expect("allocates");

    assert_eq!(barcode, family().barcode_for(2).expect("barcode"));
    let skipped = store.record(&seed).await.expect("read").expect("row");
    assert!(skipped.used);
}

#[tokio::test]
async fn exhausts_after_max_attempts() {
    let store = Arc::new(InMemoryBarcodeStore::new());
    let gateway = Arc::new(MemoryGateway::new());
    for sequence in 1..=3 {
        gateway.take_barcode(family().barcode_for(sequence).expect("barcode").as_str());
    }

    let allocator = allocator(store, gateway, Arc::new(MemoryAlerts::default()), 3);
    match allocator.allocate(&family()).await {
        Err(AllocationError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn gateway_failure_releases_the_reservation() {
    let store = Arc::new(InMemoryBarcodeStore::new());
    let gateway = Arc::new(MemoryGateway::new());
    gateway.fail_finds.store(true, Ordering::SeqCst);

    let allocator = allocator(
        store.clone(),
        gateway,
        Arc::new(MemoryAlerts::default()),
        3,
    );
    let result = allocator.allocate(&family()).await;
    assert!(matches!(result, Err(AllocationError::Gateway(_))));

    let seed = family().seed().expect("seed");
    let record = store.record(&seed).await.expect("read").expect("row");
    assert!(!record.used);
}

#[tokio::test]
async fn release_failure_keeps_the_gateway_error() {
    let store = Arc::new(RivalledStore::default());
    store.fail_release.store(true, Ordering::SeqCst);
    let gateway = Arc::new(MemoryGateway::new());
    gateway.fail_finds.store(true, Ordering::SeqCst);

    let allocator = BarcodeAllocator::new(store, gateway, Arc::new(MemoryAlerts::default()), 3);
    match allocator.allocate(&family()).await {
        Err(AllocationError::Gateway(_)) => {}
        other => panic!("expected the ILS error, got {other:?}"),
    }
}

#[tokio::test]
async fn lost_reservations_do_not_spend_attempts() {
    let store = Arc::new(RivalledStore::default());
    store.rival_wins.store(5, Ordering::SeqCst);
    let gateway = Arc::new(MemoryGateway::new());

    let allocator = BarcodeAllocator::new(
        store.clone(),
        gateway.clone(),
        Arc::new(MemoryAlerts::default()),
        1,
    );
    let barcode = allocator.allocate(&family()).await.expect("allocates");

    assert_eq!(barcode, family().barcode_for(6).expect("barcode"));
    assert_eq!(gateway.find_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn release_marks_the_row_unused() {
    let store = Arc::new(InMemoryBarcodeStore::new());
    let allocator = allocator(
        store.clone(),
        Arc::new(MemoryGateway::new()),
        Arc::new(MemoryAlerts::default()),
        3,
    );
    let barcode = allocator.allocate(&family()).await.expect("allocates");
    allocator.release(&barcode).await.expect("releases");

    assert_eq!(
        store.lowest_unused(&family()).await.expect("read"),
        Some(barcode)
    );
}

#[tokio::test]
async fn concurrent_allocations_never_share_a_barcode() {
    let store = Arc::new(InMemoryBarcodeStore::new());
    let allocator = Arc::new(allocator(
        store,
        Arc::new(MemoryGateway::new()),
        Arc::new(MemoryAlerts::default()),
        20,
    ));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let allocator = allocator.clone();
        handles.push(tokio::spawn(async move {
            allocator.allocate(&family()).await
        }));
    }

    let mut issued: Vec<Barcode> = Vec::new();
    for handle in handles {
        issued.push(handle.await.expect("task joins").expect("allocates"));
    }
    issued.sort();
    issued.dedup();
    assert_eq!(issued.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn more_concurrent_callers_than_attempts_all_succeed() {
    let store = Arc::new(InMemoryBarcodeStore::new());
    let gateway = Arc::new(MemoryGateway::new());
    gateway.find_delay_ms.store(2, Ordering::SeqCst);
    let allocator = Arc::new(allocator(
        store.clone(),
        gateway,
        Arc::new(MemoryAlerts::default()),
        2,
    ));

    let callers = 64;
    let mut handles = Vec::new();
    for _ in 0..callers {
        let allocator = allocator.clone();
        handles.push(tokio::spawn(async move {
            allocator.allocate(&family()).await
        }));
    }

    let mut issued: Vec<Barcode> = Vec::new();
    for handle in handles {
        issued.push(handle.await.expect("task joins").expect("allocates under contention"));
    }
    issued.sort();
    issued.dedup();
    assert_eq!(issued.len(), callers);
    assert!(issued.iter().all(|barcode| luhn_validate(barcode.as_str())));
    assert_eq!(store.snapshot().await.len(), callers);
}

#[tokio::test]
async fn low_supply_alert_fires_at_thresholds() {
    let narrow = BarcodeFamily::new("2888800000", 14);
    assert_eq!(narrow.capacity(), 1_000);
    let store = Arc::new(InMemoryBarcodeStore::new());
    store
        .seed(narrow.barcode_for(498).expect("barcode").as_str(), true)
        .await;
    let alerts = Arc::new(MemoryAlerts::default());

    let allocator = allocator(store, Arc::new(MemoryGateway::new()), alerts.clone(), 3);
    let barcode = allocator.allocate(&narrow).await.expect("allocates");
    assert_eq!(narrow.sequence_of(&barcode), Some(499));

    let events = alerts.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].remaining, 500);
    assert_eq!(events[0].family_prefix, "2888800000");

    allocator.allocate(&narrow).await.expect("allocates");
    assert_eq!(alerts.events().len(), 1);
}

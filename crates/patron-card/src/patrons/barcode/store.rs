use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::BarcodeFamily;
use crate::patrons::domain::Barcode;

/// Local ledger row for one barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarcodeRecord {
    pub barcode: Barcode,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("barcode store query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("barcode store migration failed: {0}")]
    Migration(String),
}

/// Persistence for the barcode ledger. The primary key on `barcode` plus the conditional
/// `used` flip arbitrate concurrent allocators.
#[async_trait]
pub trait BarcodeStore: Send + Sync {
    /// Lowest barcode of `family` currently marked unused.
    async fn lowest_unused(&self, family: &BarcodeFamily) -> Result<Option<Barcode>, StoreError>;

    /// Highest barcode of `family` on record, used or not.
    async fn highest(&self, family: &BarcodeFamily) -> Result<Option<Barcode>, StoreError>;

    /// Flips an existing unused row to used. `false` when another caller got there first.
    async fn claim(&self, barcode: &Barcode) -> Result<bool, StoreError>;

    /// Inserts a fresh row already marked used. `false` when the key already exists.
    async fn insert_used(&self, barcode: &Barcode) -> Result<bool, StoreError>;

    /// Marks a reserved barcode unused again.
    async fn release(&self, barcode: &Barcode) -> Result<(), StoreError>;

    async fn record(&self, barcode: &Barcode) -> Result<Option<BarcodeRecord>, StoreError>;
}

/// Process-local store used for tests and database-less runs.
#[derive(Debug, Default)]
pub struct InMemoryBarcodeStore {
    records: Mutex<BTreeMap<Barcode, BarcodeRecord>>,
}

impl InMemoryBarcodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds rows directly, bypassing the reservation protocol.
    pub async fn seed(&self, barcode: &str, used: bool) {
        let now = Utc::now();
        let barcode = Barcode(barcode.to_string());
        self.records.lock().await.insert(
            barcode.clone(),
            BarcodeRecord {
                barcode,
                used,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub async fn snapshot(&self) -> Vec<BarcodeRecord> {
        self.records.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl BarcodeStore for InMemoryBarcodeStore {
    async fn lowest_unused(&self, family: &BarcodeFamily) -> Result<Option<Barcode>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .find(|record| !record.used && family.contains(&record.barcode))
            .map(|record| record.barcode.clone()))
    }

    async fn highest(&self, family: &BarcodeFamily) -> Result<Option<Barcode>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .keys()
            .rev()
            .find(|barcode| family.contains(barcode))
            .cloned())
    }

    async fn claim(&self, barcode: &Barcode) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        match records.get_mut(barcode) {
            Some(record) if !record.used => {
                record.used = true;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_used(&self, barcode: &Barcode) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(barcode) {
            return Ok(false);
        }
        let now = Utc::now();
        records.insert(
            barcode.clone(),
            BarcodeRecord {
                barcode: barcode.clone(),
                used: true,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(true)
    }

    async fn release(&self, barcode: &Barcode) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(barcode) {
            record.used = false;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record(&self, barcode: &Barcode) -> Result<Option<BarcodeRecord>, StoreError> {
        Ok(self.records.lock().await.get(barcode).cloned())
    }
}

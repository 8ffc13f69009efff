//! Barcode allocation: locally unique, Luhn-valid, and unclaimed in the ILS.

mod postgres;
mod store;

pub use postgres::PgBarcodeStore;
pub use store::{BarcodeRecord, BarcodeStore, InMemoryBarcodeStore, StoreError};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::domain::Barcode;
use super::ils::{GatewayError, IdentifierKind, IdentityGateway};
use super::luhn::luhn_calculate;
use crate::config::BarcodeConfig;

/// Remaining-capacity values that trigger a low-supply alert.
pub const LOW_SUPPLY_THRESHOLDS: [u64; 8] = [1, 5, 10, 25, 50, 100, 250, 500];

/// Reservations one `allocate` call may lose to concurrent allocators before giving up.
pub const CONTENDED_CLAIM_LIMIT: u32 = 10_000;

/// A prefix plus total length; every barcode in the family ends in its Luhn digit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeFamily {
    pub prefix: String,
    pub length: usize,
}

impl BarcodeFamily {
    pub fn new(prefix: impl Into<String>, length: usize) -> Self {
        Self {
            prefix: prefix.into(),
            length,
        }
    }

    fn sequence_width(&self) -> usize {
        self.length
            .saturating_sub(1)
            .saturating_sub(self.prefix.len())
    }

    /// Number of distinct sequence values the family can encode.
    pub fn capacity(&self) -> u64 {
        u32::try_from(self.sequence_width())
            .ok()
            .and_then(|width| 10u64.checked_pow(width))
            .unwrap_or(u64::MAX)
    }

    pub fn contains(&self, barcode: &Barcode) -> bool {
        let value = barcode.as_str();
        value.len() == self.length
            && value.starts_with(&self.prefix)
            && value.bytes().all(|b| b.is_ascii_digit())
    }

    /// Sequence number carried between the prefix and the check digit.
    pub fn sequence_of(&self, barcode: &Barcode) -> Option<u64> {
        if !self.contains(barcode) {
            return None;
        }
        barcode.as_str()[self.prefix.len()..self.length - 1]
            .parse()
            .ok()
    }

    pub fn barcode_for(&self, sequence: u64) -> Option<Barcode> {
        if sequence >= self.capacity() || self.sequence_width() == 0 {
            return None;
        }
        let width = self.sequence_width();
        luhn_calculate(&format!("{}{sequence:0width$}", self.prefix)).map(Barcode)
    }

    /// First barcode handed out in an empty family.
    pub fn seed(&self) -> Option<Barcode> {
        self.barcode_for(1)
    }

    /// Sequence numbers still available after `barcode`.
    pub fn remaining_after(&self, barcode: &Barcode) -> Option<u64> {
        let sequence = self.sequence_of(barcode)?;
        Some(self.capacity().saturating_sub(sequence + 1))
    }
}

impl From<&BarcodeConfig> for BarcodeFamily {
    fn from(config: &BarcodeConfig) -> Self {
        Self::new(config.prefix.clone(), config.length)
    }
}

/// Outbound hook for barcode supply warnings.
pub trait AlertPublisher: Send + Sync {
    fn publish(&self, alert: SupplyAlert) -> Result<(), AlertError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyAlert {
    pub template: String,
    pub family_prefix: String,
    pub remaining: u64,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("alert transport unavailable: {0}")]
    Transport(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("no barcode available in family {prefix} after {attempts} attempts")]
    Exhausted { prefix: String, attempts: u32 },
    #[error("lost {conflicts} barcode reservations in family {prefix} to concurrent allocators")]
    Contended { prefix: String, conflicts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

enum Candidate {
    Unused(Barcode),
    Fresh(Barcode),
}

impl Candidate {
    fn barcode(&self) -> &Barcode {
        match self {
            Candidate::Unused(barcode) | Candidate::Fresh(barcode) => barcode,
        }
    }
}

/// Reserves barcodes in the local ledger and confirms them against the ILS.
pub struct BarcodeAllocator<S, A> {
    store: Arc<S>,
    gateway: Arc<dyn IdentityGateway>,
    alerts: Arc<A>,
    max_attempts: u32,
}

impl<S, A> BarcodeAllocator<S, A>
where
    S: BarcodeStore + 'static,
    A: AlertPublisher + 'static,
{
    pub fn new(
        store: Arc<S>,
        gateway: Arc<dyn IdentityGateway>,
        alerts: Arc<A>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            gateway,
            alerts,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Reserves the next free barcode of `family`.
    ///
    /// Only a candidate already present in the ILS spends one of `max_attempts`; it stays
    /// marked used locally. Losing a reservation to a concurrent allocator moves straight on
    /// to the next candidate, bounded separately by [`CONTENDED_CLAIM_LIMIT`].
    pub async fn allocate(&self, family: &BarcodeFamily) -> Result<Barcode, AllocationError> {
        let mut attempts = 0;
        let mut conflicts = 0;

        while attempts < self.max_attempts {
            let Some(candidate) = self.next_candidate(family).await? else {
                break;
            };

            let reserved = match &candidate {
                Candidate::Unused(barcode) => self.store.claim(barcode).await?,
                Candidate::Fresh(barcode) => self.store.insert_used(barcode).await?,
            };
            let barcode = candidate.barcode();
            if !reserved {
                conflicts += 1;
                debug!(%barcode, conflicts, "barcode reserved by a concurrent allocator");
                if conflicts >= CONTENDED_CLAIM_LIMIT {
                    return Err(AllocationError::Contended {
                        prefix: family.prefix.clone(),
                        conflicts,
                    });
                }
                continue;
            }

            attempts += 1;
            match self
                .gateway
                .available(barcode.as_str(), IdentifierKind::Barcode)
                .await
            {
                Ok(true) => {
                    info!(%barcode, attempts, "reserved barcode");
                    if let Candidate::Fresh(fresh) = &candidate {
                        self.check_supply(family, fresh);
                    }
                    return Ok(barcode.clone());
                }
                Ok(false) => {
                    warn!(%barcode, attempts, "barcode already present in the ILS; skipping");
                }
                Err(err) => {
                    if let Err(release_err) = self.release(barcode).await {
                        error!(
                            %barcode,
                            error = %release_err,
                            "failed to release barcode after ILS error"
                        );
                    }
                    return Err(err.into());
                }
            }
        }

        Err(AllocationError::Exhausted {
            prefix: family.prefix.clone(),
            attempts: self.max_attempts,
        })
    }

    /// Returns a reserved barcode to the pool.
    pub async fn release(&self, barcode: &Barcode) -> Result<(), AllocationError> {
        self.store.release(barcode).await?;
        info!(%barcode, "released barcode");
        Ok(())
    }

    async fn next_candidate(
        &self,
        family: &BarcodeFamily,
    ) -> Result<Option<Candidate>, AllocationError> {
        if let Some(unused) = self.store.lowest_unused(family).await? {
            return Ok(Some(Candidate::Unused(unused)));
        }

        let next = match self.store.highest(family).await? {
            Some(highest) => family
                .sequence_of(&highest)
                .and_then(|sequence| family.barcode_for(sequence + 1)),
            None => family.seed(),
        };
        Ok(next.map(Candidate::Fresh))
    }

    fn check_supply(&self, family: &BarcodeFamily, barcode: &Barcode) {
        let Some(remaining) = family.remaining_after(barcode) else {
            return;
        };
        if !LOW_SUPPLY_THRESHOLDS.contains(&remaining) {
            return;
        }

        warn!(prefix = %family.prefix, remaining, "barcode supply running low");
        let mut details = BTreeMap::new();
        details.insert("last_issued".to_string(), barcode.to_string());
        details.insert("length".to_string(), family.length.to_string());
        let alert = SupplyAlert {
            template: "barcode_supply_low".to_string(),
            family_prefix: family.prefix.clone(),
            remaining,
            details,
        };
        if let Err(err) = self.alerts.publish(alert) {
            warn!(error = %err, "failed to publish barcode supply alert");
        }
    }
}

//! Dependent (juvenile) accounts linked under a parent patron.
//!
//! The ILS has no relationship column, so the parent record carries its dependents in a
//! free-text varField: `{fieldTag: "x", content: "DEPENDENTS <csv of barcodes>"}`. The
//! list is parsed into [`DependentLinks`] on the way in and serialized back on the way out;
//! the cap and the preservation of unrelated `x` content both live there.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use super::domain::{Barcode, VarField};
use super::ils::{GatewayError, IdentifierKind, IdentityGateway, Patron, PatronUpdate};

pub const DEPENDENTS_FIELD_TAG: &str = "x";
pub const DEPENDENTS_SENTINEL: &str = "DEPENDENTS";
pub const MAX_DEPENDENTS: usize = 3;
/// Patron types entitled to create dependent accounts.
pub const DEPENDENT_ELIGIBLE_PTYPES: [u16; 4] = [2, 3, 8, 9];

const LEGACY_BARCODE_LENGTH: usize = 7;

fn is_link_field(field: &VarField) -> bool {
    field.field_tag == DEPENDENTS_FIELD_TAG
        && field
            .content
            .trim_start()
            .strip_prefix(DEPENDENTS_SENTINEL)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

/// Typed view of the dependent-link field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependentLinks {
    barcodes: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("parent already has {MAX_DEPENDENTS} dependent accounts")]
    CapReached,
    #[error("dependent {0} is already linked to this parent")]
    AlreadyLinked(String),
}

impl DependentLinks {
    /// Reads the sentinel-prefixed field; `x` fields without the sentinel are ignored.
    pub fn parse(var_fields: &[VarField]) -> Self {
        let barcodes = var_fields
            .iter()
            .find(|field| is_link_field(field))
            .map(|field| {
                field.content.trim_start()[DEPENDENTS_SENTINEL.len()..]
                    .split(',')
                    .map(str::trim)
                    .filter(|barcode| !barcode.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self { barcodes }
    }

    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    pub fn len(&self) -> usize {
        self.barcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barcodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.barcodes.len() >= MAX_DEPENDENTS
    }

    pub fn append(&mut self, barcode: &Barcode) -> Result<(), LinkError> {
        if self.barcodes.iter().any(|existing| existing == barcode.as_str()) {
            return Err(LinkError::AlreadyLinked(barcode.to_string()));
        }
        if self.is_full() {
            return Err(LinkError::CapReached);
        }
        self.barcodes.push(barcode.to_string());
        Ok(())
    }

    pub fn to_content(&self) -> String {
        format!("{DEPENDENTS_SENTINEL} {}", self.barcodes.join(","))
    }

    /// Full varField list with the link field replaced, or appended when absent.
    pub fn apply_to(&self, var_fields: &[VarField]) -> Vec<VarField> {
        let mut patched = var_fields.to_vec();
        match patched.iter_mut().find(|field| is_link_field(field)) {
            Some(field) => field.content = self.to_content(),
            None => patched.push(VarField::new(DEPENDENTS_FIELD_TAG, self.to_content())),
        }
        patched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    LegacyBarcode,
    Expired,
    PtypeNotAllowed,
    LimitReached,
}

impl IneligibleReason {
    pub const fn description(self) -> &'static str {
        match self {
            IneligibleReason::LegacyBarcode => {
                "Legacy 7-digit cards cannot create dependent accounts. Please visit a branch."
            }
            IneligibleReason::Expired => "Your card has expired. Please try applying again.",
            IneligibleReason::PtypeNotAllowed => {
                "Your card type cannot create dependent accounts."
            }
            IneligibleReason::LimitReached => {
                "You have reached the limit of dependent cards you can receive via online application."
            }
        }
    }
}

/// Outcome of an eligibility check. Infrastructure faults are `Err`, never a variant here.
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible {
        parent: Box<Patron>,
        dependents: DependentLinks,
    },
    Ineligible {
        reason: IneligibleReason,
    },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible { .. })
    }

    pub fn description(&self) -> &'static str {
        match self {
            Eligibility::Eligible { .. } => "This patron can create dependent accounts.",
            Eligibility::Ineligible { reason } => reason.description(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DependentError {
    #[error("a parent barcode is required")]
    MissingIdentifier,
    #[error("barcode {0} must be 14 or 16 digits")]
    InvalidBarcode(String),
    #[error("no patron found for barcode {0}")]
    ParentNotFound(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Parent lookup, cap enforcement, and link mutation.
#[derive(Clone)]
pub struct DependentAccounts {
    gateway: Arc<dyn IdentityGateway>,
}

impl DependentAccounts {
    pub fn new(gateway: Arc<dyn IdentityGateway>) -> Self {
        Self { gateway }
    }

    pub async fn check(
        &self,
        parent_barcode: &str,
        today: NaiveDate,
    ) -> Result<Eligibility, DependentError> {
        let barcode = parent_barcode.trim();
        if barcode.is_empty() {
            return Err(DependentError::MissingIdentifier);
        }
        if !barcode.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DependentError::InvalidBarcode(barcode.to_string()));
        }
        match barcode.len() {
            LEGACY_BARCODE_LENGTH => {
                return Ok(Eligibility::Ineligible {
                    reason: IneligibleReason::LegacyBarcode,
                })
            }
            14 | 16 => {}
            _ => return Err(DependentError::InvalidBarcode(barcode.to_string())),
        }

        let parent = self.fetch_parent(barcode).await?;

        let ineligible =
            |reason| -> Result<Eligibility, DependentError> { Ok(Eligibility::Ineligible { reason }) };
        if parent.expiration_date.is_some_and(|expires| today > expires) {
            return ineligible(IneligibleReason::Expired);
        }
        if !parent
            .patron_type
            .is_some_and(|ptype| DEPENDENT_ELIGIBLE_PTYPES.contains(&ptype))
        {
            return ineligible(IneligibleReason::PtypeNotAllowed);
        }
        let dependents = DependentLinks::parse(&parent.var_fields);
        if dependents.is_full() {
            return ineligible(IneligibleReason::LimitReached);
        }

        Ok(Eligibility::Eligible {
            parent: Box::new(parent),
            dependents,
        })
    }

    /// Re-reads the parent, appends `child`, and writes the patched varFields back in one
    /// update.
    pub async fn link_dependent(
        &self,
        parent_barcode: &str,
        child: &Barcode,
    ) -> Result<DependentLinks, DependentError> {
        let parent = self.fetch_parent(parent_barcode.trim()).await?;
        let mut links = DependentLinks::parse(&parent.var_fields);
        links.append(child)?;

        let update = PatronUpdate {
            var_fields: links.apply_to(&parent.var_fields),
        };
        self.gateway.update_patron(parent.id, &update).await?;
        info!(
            parent = %parent.id,
            dependent = %child,
            count = links.len(),
            "linked dependent to parent"
        );
        Ok(links)
    }

    async fn fetch_parent(&self, barcode: &str) -> Result<Patron, DependentError> {
        match self
            .gateway
            .find_patron(barcode, IdentifierKind::Barcode)
            .await
        {
            Ok(Some(parent)) => Ok(parent),
            Ok(None) | Err(GatewayError::NotFound { .. }) => {
                Err(DependentError::ParentNotFound(barcode.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

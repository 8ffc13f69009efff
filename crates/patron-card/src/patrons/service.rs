use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::address::{AddressValidator, AddressVendorError, AddressVerdict};
use super::barcode::{
    AlertPublisher, AllocationError, BarcodeAllocator, BarcodeFamily, BarcodeStore,
};
use super::dependents::{DependentAccounts, DependentError, Eligibility, IneligibleReason};
use super::domain::{Address, Barcode, Card, PatronId, PolicyType, ValidCard};
use super::ils::{GatewayError, IdentityGateway};
use super::policy::Jurisdiction;
use super::username::{UsernameCheck, UsernameError, UsernameValidator};
use super::validation::{CardValidationPipeline, PipelineError, Validation};
use crate::config::AppConfig;

/// Marks an address copied from a parent record that the ILS already holds.
pub const PARENT_RECORD_SOURCE: &str = "ils_parent_record";

/// Tunables for one issuance service instance.
#[derive(Debug, Clone)]
pub struct IssuanceSettings {
    pub family: BarcodeFamily,
    pub max_attempts: u32,
    pub jurisdiction: Jurisdiction,
}

impl IssuanceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            family: BarcodeFamily::from(&config.barcodes),
            max_attempts: config.barcodes.max_attempts,
            jurisdiction: Jurisdiction::for_state(&config.policy.jurisdiction_state),
        }
    }
}

impl Default for IssuanceSettings {
    fn default() -> Self {
        Self {
            family: BarcodeFamily::new("28888", 14),
            max_attempts: 10,
            jurisdiction: Jurisdiction::default(),
        }
    }
}

/// Application for a juvenile card under an existing parent account. Address and email
/// come from the parent record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DependentRequest {
    pub parent_barcode: String,
    pub name: String,
    pub username: String,
    pub pin: String,
    pub birthdate: Option<NaiveDate>,
    pub home_library_code: Option<String>,
    pub ecommunications_pref: bool,
    pub accept_terms: bool,
}

/// Summary of a patron created in the ILS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPatron {
    pub id: PatronId,
    pub barcode: Barcode,
    pub username: String,
    pub ptype: u16,
    pub ptype_label: &'static str,
    pub expiration_date: NaiveDate,
    pub agency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_barcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependents: Option<Vec<String>>,
}

impl CreatedPatron {
    fn new(valid: &ValidCard, id: PatronId, barcode: Barcode) -> Self {
        let classification = valid.classification();
        Self {
            id,
            barcode,
            username: valid.card().username.trim().to_string(),
            ptype: classification.ptype.code(),
            ptype_label: classification.ptype.label(),
            expiration_date: classification.expiration_date,
            agency: classification.agency.clone(),
            parent_barcode: None,
            dependents: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("the card application has field errors")]
    Invalid {
        errors: BTreeMap<String, String>,
        alternates: Vec<Address>,
    },
    #[error("{}", .0.description())]
    Ineligible(IneligibleReason),
    #[error(transparent)]
    Dependent(#[from] DependentError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Username(#[from] UsernameError),
    #[error(transparent)]
    Address(#[from] AddressVendorError),
    #[error("patron {id} was created but could not be linked to its parent: {source}")]
    LinkFailed {
        id: PatronId,
        barcode: Barcode,
        #[source]
        source: DependentError,
    },
}

/// Entry point composing validation, barcode allocation, remote creation, and dependent
/// linking.
pub struct CardIssuanceService<S, A> {
    pipeline: Arc<CardValidationPipeline>,
    allocator: Arc<BarcodeAllocator<S, A>>,
    gateway: Arc<dyn IdentityGateway>,
    addresses: Arc<dyn AddressValidator>,
    usernames: UsernameValidator,
    dependents: DependentAccounts,
    family: BarcodeFamily,
    today: fn() -> NaiveDate,
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

impl<S, A> CardIssuanceService<S, A>
where
    S: BarcodeStore + 'static,
    A: AlertPublisher + 'static,
{
    pub fn new(
        gateway: Arc<dyn IdentityGateway>,
        addresses: Arc<dyn AddressValidator>,
        store: Arc<S>,
        alerts: Arc<A>,
        settings: IssuanceSettings,
    ) -> Self {
        let usernames = UsernameValidator::new(gateway.clone());
        let pipeline = Arc::new(CardValidationPipeline::new(
            usernames.clone(),
            addresses.clone(),
            settings.jurisdiction,
        ));
        let allocator = Arc::new(BarcodeAllocator::new(
            store,
            gateway.clone(),
            alerts,
            settings.max_attempts,
        ));

        Self {
            pipeline,
            allocator,
            dependents: DependentAccounts::new(gateway.clone()),
            gateway,
            addresses,
            usernames,
            family: settings.family,
            today: utc_today,
        }
    }

    /// Pins the evaluation date, for deterministic tests.
    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn allocator(&self) -> &BarcodeAllocator<S, A> {
        &self.allocator
    }

    /// Validates the card and, when valid, provisions it in the ILS.
    pub async fn create_patron(&self, card: Card) -> Result<CreatedPatron, IssuanceError> {
        let valid = self.validated(card).await?;
        self.provision(&valid).await
    }

    /// Creates a juvenile card under `request.parent_barcode` and links it to the parent.
    pub async fn create_dependent(
        &self,
        request: DependentRequest,
    ) -> Result<CreatedPatron, IssuanceError> {
        let today = (self.today)();
        let parent = match self.dependents.check(&request.parent_barcode, today).await? {
            Eligibility::Eligible { parent, .. } => parent,
            Eligibility::Ineligible { reason } => return Err(IssuanceError::Ineligible(reason)),
        };

        let card = Card {
            name: request.name,
            address: parent
                .home_address()
                .map(|address| address.trusted(PARENT_RECORD_SOURCE))
                .unwrap_or_default(),
            username: request.username,
            pin: request.pin,
            email: parent.emails.first().cloned().unwrap_or_default(),
            birthdate: request.birthdate,
            age_gate: true,
            policy_type: PolicyType::DependentJuvenile,
            home_library_code: request.home_library_code,
            ecommunications_pref: request.ecommunications_pref,
            accept_terms: request.accept_terms,
            ..Card::default()
        };

        let valid = self.validated(card).await?;
        let mut created = self.provision(&valid).await?;
        let parent_barcode = request.parent_barcode.trim().to_string();

        match self
            .dependents
            .link_dependent(&parent_barcode, &created.barcode)
            .await
        {
            Ok(links) => {
                created.dependents = Some(links.barcodes().to_vec());
                created.parent_barcode = Some(parent_barcode);
                Ok(created)
            }
            Err(source) => {
                error!(
                    patron = %created.id,
                    barcode = %created.barcode,
                    parent = %parent_barcode,
                    error = %source,
                    "dependent created but parent link update failed"
                );
                Err(IssuanceError::LinkFailed {
                    id: created.id,
                    barcode: created.barcode,
                    source,
                })
            }
        }
    }

    pub async fn dependent_eligibility(
        &self,
        parent_barcode: &str,
    ) -> Result<Eligibility, IssuanceError> {
        Ok(self
            .dependents
            .check(parent_barcode, (self.today)())
            .await?)
    }

    pub async fn validate_username(&self, username: &str) -> Result<UsernameCheck, IssuanceError> {
        Ok(self.usernames.validate(username).await?)
    }

    /// Standalone address check. Already-validated addresses are returned without a vendor call.
    pub async fn validate_address(
        &self,
        address: &Address,
    ) -> Result<AddressVerdict, IssuanceError> {
        if address.has_been_validated {
            return Ok(AddressVerdict::Valid(address.clone()));
        }
        Ok(self.addresses.validate(address).await?)
    }

    async fn validated(&self, card: Card) -> Result<ValidCard, IssuanceError> {
        match self.pipeline.validate(card, (self.today)()).await? {
            Validation::Valid(valid) => Ok(valid),
            Validation::Invalid(card) => Err(IssuanceError::Invalid {
                errors: card.errors,
                alternates: card.address_alternates,
            }),
        }
    }

    /// Reserves a barcode and creates the remote patron, releasing the barcode when the
    /// create fails.
    async fn provision(&self, valid: &ValidCard) -> Result<CreatedPatron, IssuanceError> {
        let barcode = self.allocator.allocate(&self.family).await?;

        match self.gateway.create_patron(valid, &barcode).await {
            Ok(id) => {
                info!(patron = %id, %barcode, ptype = valid.classification().ptype.code(), "created patron");
                Ok(CreatedPatron::new(valid, id, barcode))
            }
            Err(err) => {
                warn!(%barcode, error = %err, "patron create failed; releasing barcode");
                if let Err(release_err) = self.allocator.release(&barcode).await {
                    error!(%barcode, error = %release_err, "failed to release barcode");
                }
                Err(err.into())
            }
        }
    }
}

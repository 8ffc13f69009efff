use std::sync::{Arc, LazyLock};

use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, info};

use super::address::{AddressValidator, AddressVendorError, AddressVerdict};
use super::domain::{Address, Card, ValidCard};
use super::ils::GatewayError;
use super::policy::{age_on, Jurisdiction, LocationFacts, PolicyEngine};
use super::username::{UsernameCheck, UsernameError, UsernameValidator};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex is valid")
});
static PIN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}$").expect("pin regex is valid"));

const ALTERNATE_ADDRESS_MESSAGE: &str =
    "Multiple addresses matched; choose one of the alternates.";

/// Verdict for a card that made it past the fail-fast stages.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid(ValidCard),
    /// The card with its `errors` map populated.
    Invalid(Card),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("the terms and conditions must be accepted")]
    TermsNotAccepted,
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error(transparent)]
    Identity(#[from] GatewayError),
    #[error(transparent)]
    AddressService(#[from] AddressVendorError),
}

/// Runs terms, required fields, policy, format, username, and address checks in order and
/// classifies the card once every stage is clean.
#[derive(Clone)]
pub struct CardValidationPipeline {
    usernames: UsernameValidator,
    addresses: Arc<dyn AddressValidator>,
    engine: PolicyEngine,
    jurisdiction: Jurisdiction,
}

impl CardValidationPipeline {
    pub fn new(
        usernames: UsernameValidator,
        addresses: Arc<dyn AddressValidator>,
        jurisdiction: Jurisdiction,
    ) -> Self {
        Self {
            usernames,
            addresses,
            engine: PolicyEngine,
            jurisdiction,
        }
    }

    pub async fn validate(
        &self,
        mut card: Card,
        today: NaiveDate,
    ) -> Result<Validation, PipelineError> {
        if !card.accept_terms {
            return Err(PipelineError::TermsNotAccepted);
        }

        let missing = card.missing_required_fields();
        if !missing.is_empty() {
            return Err(PipelineError::MissingFields(missing));
        }

        check_age(&mut card, today);
        check_formats(&mut card);
        self.check_username(&mut card).await?;
        self.check_addresses(&mut card).await?;

        if !card.is_clean() {
            debug!(fields = ?card.errors.keys().collect::<Vec<_>>(), "card failed validation");
            return Ok(Validation::Invalid(card));
        }

        let facts = LocationFacts::resolve(&card, &self.jurisdiction);
        let classification = self.engine.classify(card.policy_type, &facts, today);
        info!(
            policy = card.policy_type.label(),
            ptype = classification.ptype.code(),
            expiration = %classification.expiration_date,
            "card classified"
        );
        Ok(Validation::Valid(ValidCard::new(card, classification)))
    }

    async fn check_username(&self, card: &mut Card) -> Result<(), PipelineError> {
        if card.username_has_been_validated {
            return Ok(());
        }

        match self.usernames.validate(&card.username).await {
            Ok(UsernameCheck::Available) => {
                card.username_has_been_validated = true;
                Ok(())
            }
            Ok(check @ UsernameCheck::Unavailable) => {
                card.record_error("username", check.message());
                Ok(())
            }
            Err(err @ UsernameError::Invalid) => {
                card.record_error("username", err.to_string());
                Ok(())
            }
            Err(UsernameError::Gateway(err)) => Err(err.into()),
        }
    }

    async fn check_addresses(&self, card: &mut Card) -> Result<(), PipelineError> {
        if !card.address.has_been_validated {
            match self.addresses.validate(&card.address).await? {
                AddressVerdict::Valid(address) => card.address = address,
                AddressVerdict::Alternate(options) => {
                    card.record_error("address", ALTERNATE_ADDRESS_MESSAGE);
                    card.address_alternates = options;
                }
                AddressVerdict::Unrecognized { detail, .. } => {
                    card.record_error("address", detail);
                }
            }
        }

        let Some(work) = card.work_address.clone() else {
            return Ok(());
        };
        if work.is_blank() || work.has_been_validated {
            return Ok(());
        }
        match self.work_address_verdict(&work).await {
            Ok(address) => card.work_address = Some(address),
            Err(message) => card.record_error("workAddress", message),
        }
        Ok(())
    }

    /// Vendor failures on the work address surface as a field error, not a service error.
    async fn work_address_verdict(&self, work: &Address) -> Result<Address, String> {
        match self.addresses.validate(work).await {
            Ok(AddressVerdict::Valid(address)) => Ok(address),
            Ok(AddressVerdict::Alternate(_)) => Err(ALTERNATE_ADDRESS_MESSAGE.to_string()),
            Ok(AddressVerdict::Unrecognized { detail, .. }) => Err(detail),
            Err(err) => Err(err.to_string()),
        }
    }
}

fn check_age(card: &mut Card, today: NaiveDate) {
    let policy = card.policy_type;
    if policy.requires_age_gate() && !card.age_gate {
        card.record_error("ageGate", "You must be 13 years or older to continue.");
    }
    if !policy.requires_birthdate() {
        return;
    }
    match (card.birthdate, policy.minimum_age()) {
        (None, _) => card.record_error("birthdate", "A birthdate is required."),
        (Some(birthdate), Some(minimum)) if age_on(birthdate, today) < minimum => {
            card.record_error(
                "birthdate",
                format!("You must be {minimum} years or older to apply."),
            );
        }
        _ => {}
    }
}

fn check_formats(card: &mut Card) {
    if !EMAIL_PATTERN.is_match(card.email.trim()) {
        card.record_error("email", "Please enter a valid email address.");
    }
    if !PIN_PATTERN.is_match(&card.pin) {
        card.record_error("pin", "PIN should be 4 numeric characters only.");
    }
}

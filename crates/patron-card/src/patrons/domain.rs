use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::policy::Classification;

/// Free-text field tag the ILS uses for patron barcodes.
pub const BARCODE_FIELD_TAG: &str = "b";
/// Free-text field tag carrying the username; the ILS has no native username column.
pub const USERNAME_FIELD_TAG: &str = "u";

/// Postal address supplied by an applicant or returned by the address vendor.
///
/// Once `has_been_validated` is set the value came from the vendor (or was trusted from an
/// already-validated parent record) and is only ever replaced wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub county: Option<String>,
    pub state: String,
    pub zip: String,
    pub is_residential: Option<bool>,
    pub has_been_validated: bool,
    pub validated_by: Option<String>,
}

impl Address {
    pub fn is_blank(&self) -> bool {
        self.line1.trim().is_empty() && self.city.trim().is_empty() && self.zip.trim().is_empty()
    }

    /// Copy of this address marked as validated by a trusted source other than the vendor.
    pub fn trusted(&self, source: &str) -> Self {
        Self {
            has_been_validated: true,
            validated_by: Some(source.to_string()),
            ..self.clone()
        }
    }

    /// Rebuilds an address from the two-line layout the ILS stores
    /// (`"123 MAIN ST"`, `"NEW YORK, NY 10001"`).
    pub fn from_ils_lines(lines: &[String]) -> Option<Self> {
        let (street, locality) = match lines {
            [street, locality, ..] => (street, locality),
            _ => return None,
        };

        let (city, rest) = locality.rsplit_once(',')?;
        let mut parts = rest.split_whitespace();
        let state = parts.next()?.to_string();
        let zip = parts.next().unwrap_or_default().to_string();

        Some(Self {
            line1: street.trim().to_string(),
            line2: None,
            city: city.trim().to_string(),
            county: None,
            state,
            zip,
            is_residential: Some(true),
            has_been_validated: false,
            validated_by: None,
        })
    }

    /// Two-line representation sent to the ILS, uppercased.
    pub fn to_ils_lines(&self) -> Vec<String> {
        let street = match self.line2.as_deref().map(str::trim) {
            Some(line2) if !line2.is_empty() => format!("{} {}", self.line1.trim(), line2),
            _ => self.line1.trim().to_string(),
        };
        let locality = format!(
            "{}, {} {}",
            self.city.trim(),
            self.state.trim(),
            self.zip.trim()
        );
        vec![street.to_uppercase(), locality.to_uppercase()]
    }
}

/// Card issuance policy selected once per application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyType {
    #[serde(rename = "simplye")]
    StandardResident,
    #[default]
    #[serde(rename = "webApplicant")]
    WebApplicant,
    #[serde(rename = "simplyeJuvenile")]
    DependentJuvenile,
}

impl PolicyType {
    pub const fn label(self) -> &'static str {
        match self {
            PolicyType::StandardResident => "simplye",
            PolicyType::WebApplicant => "webApplicant",
            PolicyType::DependentJuvenile => "simplyeJuvenile",
        }
    }

    /// Youngest age accepted when a birthdate is collected.
    pub const fn minimum_age(self) -> Option<u32> {
        match self {
            PolicyType::StandardResident => Some(13),
            PolicyType::WebApplicant | PolicyType::DependentJuvenile => None,
        }
    }

    pub const fn requires_birthdate(self) -> bool {
        matches!(self, PolicyType::StandardResident)
    }

    pub const fn requires_age_gate(self) -> bool {
        matches!(self, PolicyType::WebApplicant)
    }
}

/// Location reported alongside the application (typically from IP geolocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclaredLocation {
    #[serde(rename = "nyc")]
    City,
    #[serde(rename = "nys")]
    State,
    #[serde(rename = "us")]
    Country,
    #[serde(other)]
    Abroad,
}

/// Remote-record free-text field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VarField {
    pub field_tag: String,
    pub content: String,
}

impl VarField {
    pub fn new(field_tag: &str, content: impl Into<String>) -> Self {
        Self {
            field_tag: field_tag.to_string(),
            content: content.into(),
        }
    }
}

/// Allocated patron barcode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Barcode(pub String);

impl Barcode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Barcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric patron record id assigned by the ILS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatronId(pub u64);

impl std::fmt::Display for PatronId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Candidate record accumulated during one application.
///
/// Field errors are collected in `errors`; classification and barcode only exist on
/// [`ValidCard`], which the validation pipeline alone can produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Card {
    pub name: String,
    pub address: Address,
    pub work_address: Option<Address>,
    pub username: String,
    pub pin: String,
    pub email: String,
    pub birthdate: Option<NaiveDate>,
    pub age_gate: bool,
    pub policy_type: PolicyType,
    pub home_library_code: Option<String>,
    pub var_fields: Vec<VarField>,
    pub ecommunications_pref: bool,
    pub location: Option<DeclaredLocation>,
    pub accept_terms: bool,
    pub username_has_been_validated: bool,
    #[serde(skip_deserializing)]
    pub errors: BTreeMap<String, String>,
    #[serde(skip_deserializing)]
    pub address_alternates: Vec<Address>,
}

impl Card {
    pub fn record_error(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Required fields that are absent, in reporting order.
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.address.is_blank() {
            missing.push("address");
        }
        if self.username.trim().is_empty() {
            missing.push("username");
        }
        if self.pin.trim().is_empty() {
            missing.push("pin");
        }
        if self.email.trim().is_empty() {
            missing.push("email");
        }
        missing
    }

    /// Name in the ILS `LAST, FIRST MIDDLE` layout, uppercased.
    pub fn ils_name(&self) -> String {
        let tokens: Vec<&str> = self.name.split_whitespace().collect();
        match tokens.split_last() {
            Some((last, rest)) if !rest.is_empty() => {
                format!("{}, {}", last, rest.join(" ")).to_uppercase()
            }
            _ => self.name.trim().to_uppercase(),
        }
    }
}

/// A card that passed every validation stage and carries its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidCard {
    card: Card,
    classification: Classification,
}

impl ValidCard {
    pub(crate) fn new(card: Card, classification: Classification) -> Self {
        Self {
            card,
            classification,
        }
    }

    pub fn card(&self) -> &Card {
        &self.card
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn into_card(self) -> Card {
        self.card
    }
}

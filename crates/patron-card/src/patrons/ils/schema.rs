//! Wire shapes of the ILS patron API.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::patrons::domain::{Address, Barcode, PatronId, ValidCard, VarField, USERNAME_FIELD_TAG};

/// Fields requested from the find endpoint.
pub const PATRON_FIELDS: &str =
    "id,names,barcodes,expirationDate,birthDate,emails,patronType,addresses,varFields";

/// Fixed-field number holding the patron agency.
pub const AGENCY_FIXED_FIELD: &str = "158";
/// Fixed-field number holding the notice preference.
pub const NOTICE_PREFERENCE_FIXED_FIELD: &str = "268";

/// Patron record as returned by the find endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patron {
    pub id: PatronId,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub barcodes: Vec<String>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub patron_type: Option<u16>,
    #[serde(default)]
    pub addresses: Vec<PatronAddress>,
    #[serde(default)]
    pub var_fields: Vec<VarField>,
}

impl Patron {
    /// Home address (type `a`), or the first address on file.
    pub fn home_address(&self) -> Option<Address> {
        self.addresses
            .iter()
            .find(|address| address.kind == "a")
            .or_else(|| self.addresses.first())
            .and_then(|address| Address::from_ils_lines(&address.lines))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatronAddress {
    pub lines: Vec<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedField {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatronCodes {
    pub pcode1: String,
}

/// Create-patron request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatron {
    pub names: Vec<String>,
    pub addresses: Vec<PatronAddress>,
    pub emails: Vec<String>,
    pub pin: String,
    pub patron_type: u16,
    pub expiration_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_library_code: Option<String>,
    pub barcodes: Vec<String>,
    pub var_fields: Vec<VarField>,
    pub fixed_fields: BTreeMap<String, FixedField>,
    pub patron_codes: PatronCodes,
}

impl NewPatron {
    pub fn from_card(valid: &ValidCard, barcode: &Barcode) -> Self {
        let card = valid.card();
        let classification = valid.classification();

        let mut addresses = vec![PatronAddress {
            lines: card.address.to_ils_lines(),
            kind: "a".to_string(),
        }];
        if let Some(work) = card.work_address.as_ref().filter(|work| !work.is_blank()) {
            addresses.push(PatronAddress {
                lines: work.to_ils_lines(),
                kind: "h".to_string(),
            });
        }

        let mut var_fields = vec![VarField::new(USERNAME_FIELD_TAG, card.username.trim())];
        var_fields.extend(
            card.var_fields
                .iter()
                .filter(|field| field.field_tag != USERNAME_FIELD_TAG)
                .cloned(),
        );

        let email = card.email.trim().to_string();
        let notice_preference = if email.is_empty() { "-" } else { "z" };

        let mut fixed_fields = BTreeMap::new();
        fixed_fields.insert(
            AGENCY_FIXED_FIELD.to_string(),
            FixedField {
                label: "PAT AGENCY".to_string(),
                value: classification.agency.clone(),
            },
        );
        fixed_fields.insert(
            NOTICE_PREFERENCE_FIXED_FIELD.to_string(),
            FixedField {
                label: "NOTICE PREFERENCE".to_string(),
                value: notice_preference.to_string(),
            },
        );

        Self {
            names: vec![card.ils_name()],
            addresses,
            emails: if email.is_empty() { Vec::new() } else { vec![email] },
            pin: card.pin.clone(),
            patron_type: classification.ptype.code(),
            expiration_date: classification.expiration_date,
            birth_date: card.birthdate,
            home_library_code: card.home_library_code.clone(),
            barcodes: vec![barcode.0.clone()],
            var_fields,
            fixed_fields,
            patron_codes: PatronCodes {
                pcode1: if card.ecommunications_pref { "s" } else { "-" }.to_string(),
            },
        }
    }
}

/// Partial update body for `PUT /patrons/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatronUpdate {
    pub var_fields: Vec<VarField>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedLink {
    pub link: String,
}

/// Parses the numeric record id from the final path segment of a created-patron link.
pub fn patron_id_from_link(link: &str) -> Option<PatronId> {
    link.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse::<u64>().ok())
        .map(PatronId)
}

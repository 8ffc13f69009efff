//! Address verification against the Service Objects AV3 vendor.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, warn};

use super::domain::Address;
use crate::config::AddressVendorConfig;

/// Tag stamped on addresses the vendor returned.
pub const VENDOR_TAG: &str = "service_objects";

/// `DescCode` values of domain-specific (`TypeCode 4`) errors that describe the applicant's
/// address rather than the integration.
pub const DOMAIN_DESC_CODES: [&str; 7] = ["1", "2", "3", "4", "5", "6", "7"];

const AUTHORIZATION_TYPE_CODE: &str = "1";
const DOMAIN_TYPE_CODE: &str = "4";
const DPV_NOT_DELIVERABLE: &str = "2";

/// Result of one vendor lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressVerdict {
    /// Exactly one deliverable match; the vendor copy replaces the submitted address.
    Valid(Address),
    /// Several candidate matches the applicant must choose from.
    Alternate(Vec<Address>),
    /// The vendor could not recognize the address. `detail` is the vendor's own text.
    Unrecognized { code: String, detail: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AddressVendorError {
    #[error("address vendor rejected the license key: {detail}")]
    Authorization { detail: String },
    #[error("address vendor integration error (type {type_code}, desc {desc_code}): {detail}")]
    Integration {
        type_code: String,
        desc_code: String,
        detail: String,
    },
    #[error("address vendor returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("address vendor request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("address vendor response could not be parsed: {0}")]
    Deserialization(String),
}

/// Address verification capability.
#[async_trait]
pub trait AddressValidator: Send + Sync {
    async fn validate(&self, address: &Address) -> Result<AddressVerdict, AddressVendorError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct VendorResponse {
    pub addresses: Vec<VendorAddress>,
    pub error: Option<VendorError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct VendorAddress {
    pub address1: String,
    pub address2: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub county_name: String,
    pub is_residential: String,
    #[serde(rename = "DPV")]
    pub dpv: String,
    #[serde(rename = "DPVDesc")]
    pub dpv_desc: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct VendorError {
    #[serde(rename = "Type")]
    pub kind: String,
    pub type_code: String,
    pub desc: String,
    pub desc_code: String,
}

impl VendorAddress {
    fn into_address(self) -> Address {
        let line2 = Some(self.address2.trim().to_string()).filter(|line| !line.is_empty());
        let county = Some(self.county_name.trim().to_string()).filter(|c| !c.is_empty());
        Address {
            line1: self.address1.trim().to_string(),
            line2,
            city: self.city.trim().to_string(),
            county,
            state: self.state.trim().to_ascii_uppercase(),
            zip: zip5(&self.zip),
            is_residential: match self.is_residential.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            has_been_validated: true,
            validated_by: Some(VENDOR_TAG.to_string()),
        }
    }
}

fn zip5(raw: &str) -> String {
    raw.trim().chars().take(5).collect()
}

fn collapse(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cleans a raw submitted address before it is sent to the vendor.
pub fn normalize_raw(address: &Address) -> Address {
    Address {
        line1: collapse(&address.line1),
        line2: address
            .line2
            .as_deref()
            .map(collapse)
            .filter(|line| !line.is_empty()),
        city: collapse(&address.city),
        county: address.county.as_deref().map(collapse),
        state: address.state.trim().to_ascii_uppercase(),
        zip: zip5(&address.zip),
        ..address.clone()
    }
}

/// Maps a parsed vendor body to exactly one verdict or error. A body carrying an `Error`
/// envelope is never a success, whatever the HTTP status was.
pub(crate) fn classify(response: VendorResponse) -> Result<AddressVerdict, AddressVendorError> {
    if let Some(err) = response.error {
        let type_code = err.type_code.trim();
        let desc_code = err.desc_code.trim();
        if type_code == AUTHORIZATION_TYPE_CODE {
            return Err(AddressVendorError::Authorization { detail: err.desc });
        }
        if type_code == DOMAIN_TYPE_CODE && DOMAIN_DESC_CODES.contains(&desc_code) {
            return Ok(AddressVerdict::Unrecognized {
                code: desc_code.to_string(),
                detail: err.desc,
            });
        }
        return Err(AddressVendorError::Integration {
            type_code: type_code.to_string(),
            desc_code: desc_code.to_string(),
            detail: format!("{}: {}", err.kind, err.desc),
        });
    }

    let mut addresses = response.addresses;
    match addresses.len() {
        0 => Ok(AddressVerdict::Unrecognized {
            code: "no_match".to_string(),
            detail: "Address could not be matched".to_string(),
        }),
        1 => {
            let only = addresses.remove(0);
            if only.dpv.trim() == DPV_NOT_DELIVERABLE {
                Ok(AddressVerdict::Unrecognized {
                    code: format!("dpv_{}", only.dpv.trim()),
                    detail: only.dpv_desc,
                })
            } else {
                Ok(AddressVerdict::Valid(only.into_address()))
            }
        }
        _ => Ok(AddressVerdict::Alternate(
            addresses
                .into_iter()
                .map(VendorAddress::into_address)
                .collect(),
        )),
    }
}

/// Service Objects `GetBestMatchesJson` client.
pub struct ServiceObjectsClient {
    http: reqwest::Client,
    endpoint: String,
    license_key: String,
}

impl std::fmt::Debug for ServiceObjectsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceObjectsClient")
            .field("endpoint", &self.endpoint)
            .field("license_key", &"[REDACTED]")
            .finish()
    }
}

impl ServiceObjectsClient {
    pub fn new(config: &AddressVendorConfig) -> Result<Self, AddressVendorError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.base_url.to_string(),
            license_key: config.license_key.clone(),
        })
    }
}

#[async_trait]
impl AddressValidator for ServiceObjectsClient {
    async fn validate(&self, address: &Address) -> Result<AddressVerdict, AddressVendorError> {
        let address = normalize_raw(address);
        let query = [
            ("Address", address.line1.as_str()),
            ("Address2", address.line2.as_deref().unwrap_or_default()),
            ("City", address.city.as_str()),
            ("State", address.state.as_str()),
            ("PostalCode", address.zip.as_str()),
            ("LicenseKey", self.license_key.as_str()),
        ];

        let response = self
            .http
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|err| {
                error!(error = %err, "address vendor transport failure");
                AddressVendorError::Transport(err)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "address vendor request failed");
            return Err(AddressVendorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: VendorResponse = response
            .json()
            .await
            .map_err(|err| AddressVendorError::Deserialization(err.to_string()))?;

        let verdict = classify(body);
        if let Err(err) = &verdict {
            warn!(error = %err, "address vendor returned an error envelope");
        }
        verdict
    }
}

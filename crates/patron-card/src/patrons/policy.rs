//! Card classification rules.
//!
//! Everything here is a pure function of the policy type, the resolved location facts, and
//! the evaluation date so the eligibility matrix can be exercised without any collaborators.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::domain::{Address, Card, DeclaredLocation, PolicyType};

/// Agency code stamped on cards issued through the standard and juvenile policies.
pub const STANDARD_AGENCY: &str = "199";
/// Agency code stamped on cards issued to web applicants.
pub const WEB_AGENCY: &str = "202";

/// ILS patron type codes this service can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ptype {
    StandardMetro,
    StandardNonMetro,
    DependentJuvenile,
    StandardTemporary,
    WebDigitalTemporary,
    WebDigitalNonMetro,
    WebDigitalMetro,
}

impl Ptype {
    pub const fn code(self) -> u16 {
        match self {
            Ptype::StandardMetro => 2,
            Ptype::StandardNonMetro => 3,
            Ptype::DependentJuvenile => 4,
            Ptype::StandardTemporary => 5,
            Ptype::WebDigitalTemporary => 7,
            Ptype::WebDigitalNonMetro => 8,
            Ptype::WebDigitalMetro => 9,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Ptype::StandardMetro => "standard metro",
            Ptype::StandardNonMetro => "standard non-metro",
            Ptype::DependentJuvenile => "dependent juvenile",
            Ptype::StandardTemporary => "standard temporary",
            Ptype::WebDigitalTemporary => "web digital temporary",
            Ptype::WebDigitalNonMetro => "web digital non-metro",
            Ptype::WebDigitalMetro => "web digital metro",
        }
    }

    /// Days until a newly issued card of this type expires.
    pub const fn expiration_days(self) -> i64 {
        match self {
            Ptype::WebDigitalTemporary => 30,
            Ptype::StandardTemporary => 90,
            Ptype::StandardNonMetro | Ptype::WebDigitalNonMetro => 365,
            Ptype::StandardMetro | Ptype::WebDigitalMetro | Ptype::DependentJuvenile => 1095,
        }
    }

    pub const fn agency(self) -> &'static str {
        match self {
            Ptype::WebDigitalTemporary | Ptype::WebDigitalNonMetro | Ptype::WebDigitalMetro => {
                WEB_AGENCY
            }
            Ptype::StandardMetro
            | Ptype::StandardNonMetro
            | Ptype::DependentJuvenile
            | Ptype::StandardTemporary => STANDARD_AGENCY,
        }
    }
}

/// Outcome of classification: the account type, its expiration, and the owning agency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub ptype: Ptype,
    pub expiration_date: NaiveDate,
    pub agency: String,
}

/// Where the applicant lives relative to the library's service area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residence {
    City,
    State,
    Country,
    Abroad,
    Unknown,
}

/// Geography of the library's service area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jurisdiction {
    pub state: String,
    pub city_counties: Vec<String>,
    pub city_names: Vec<String>,
}

impl Default for Jurisdiction {
    fn default() -> Self {
        Self::for_state("NY")
    }
}

impl Jurisdiction {
    pub fn for_state(state: &str) -> Self {
        let to_owned = |values: &[&str]| values.iter().map(|v| v.to_string()).collect();
        Self {
            state: state.trim().to_ascii_uppercase(),
            city_counties: to_owned(&["NEW YORK", "BRONX", "KINGS", "QUEENS", "RICHMOND"]),
            city_names: to_owned(&[
                "NEW YORK",
                "MANHATTAN",
                "BRONX",
                "BROOKLYN",
                "STATEN ISLAND",
                "QUEENS",
            ]),
        }
    }

    pub fn in_state(&self, address: &Address) -> bool {
        address.state.trim().eq_ignore_ascii_case(&self.state)
    }

    pub fn in_city(&self, address: &Address) -> bool {
        if !self.in_state(address) {
            return false;
        }
        let county_match = address.county.as_deref().is_some_and(|county| {
            let county = normalize_place(county);
            self.city_counties.iter().any(|c| *c == county)
        });
        let city = normalize_place(&address.city);
        county_match || self.city_names.iter().any(|c| *c == city)
    }

    fn residence_of(&self, address: &Address) -> Residence {
        if self.in_city(address) {
            Residence::City
        } else if self.in_state(address) {
            Residence::State
        } else {
            Residence::Country
        }
    }
}

fn normalize_place(value: &str) -> String {
    let upper = value.trim().to_ascii_uppercase();
    upper
        .strip_suffix(" COUNTY")
        .map(str::to_string)
        .unwrap_or(upper)
}

/// Location facts the policy rules consume, resolved from the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationFacts {
    pub residence: Residence,
    pub works_in_city: bool,
    pub address_is_residential: bool,
    pub address_has_been_validated: bool,
}

impl LocationFacts {
    /// Resolves facts from a card's addresses, falling back to the declared location when
    /// the home address has not been validated. A declared location outside the country
    /// always wins.
    pub fn resolve(card: &Card, jurisdiction: &Jurisdiction) -> Self {
        let address = &card.address;
        let residence = match (card.location, address.has_been_validated) {
            (Some(DeclaredLocation::Abroad), _) => Residence::Abroad,
            (_, true) => jurisdiction.residence_of(address),
            (Some(DeclaredLocation::City), false) => Residence::City,
            (Some(DeclaredLocation::State), false) => Residence::State,
            (Some(DeclaredLocation::Country), false) => Residence::Country,
            (None, false) => Residence::Unknown,
        };

        let works_in_city = card
            .work_address
            .as_ref()
            .is_some_and(|work| work.has_been_validated && jurisdiction.in_city(work));

        Self {
            residence,
            works_in_city,
            address_is_residential: address.is_residential == Some(true),
            address_has_been_validated: address.has_been_validated,
        }
    }

    pub fn lives_in_city(&self) -> bool {
        self.residence == Residence::City
    }

    pub fn lives_in_state(&self) -> bool {
        matches!(self.residence, Residence::City | Residence::State)
    }

    pub fn lives_in_country(&self) -> bool {
        matches!(
            self.residence,
            Residence::City | Residence::State | Residence::Country
        )
    }

    fn verified_home(&self) -> bool {
        self.address_is_residential && self.address_has_been_validated
    }
}

/// Stateless classifier mapping policy + location facts to a card classification.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    pub fn ptype_for(&self, policy: PolicyType, facts: &LocationFacts) -> Ptype {
        match policy {
            PolicyType::DependentJuvenile => Ptype::DependentJuvenile,
            PolicyType::WebApplicant => web_applicant_ptype(facts),
            PolicyType::StandardResident => standard_resident_ptype(facts),
        }
    }

    pub fn classify(
        &self,
        policy: PolicyType,
        facts: &LocationFacts,
        today: NaiveDate,
    ) -> Classification {
        let ptype = self.ptype_for(policy, facts);
        Classification {
            ptype,
            expiration_date: today + Duration::days(ptype.expiration_days()),
            agency: ptype.agency().to_string(),
        }
    }
}

fn web_applicant_ptype(facts: &LocationFacts) -> Ptype {
    if facts.residence == Residence::Abroad || facts.residence == Residence::Unknown {
        return Ptype::WebDigitalTemporary;
    }

    if facts.lives_in_city() && facts.verified_home() {
        return Ptype::WebDigitalMetro;
    }

    if facts.lives_in_state()
        && !facts.lives_in_city()
        && !facts.works_in_city
        && facts.verified_home()
    {
        return Ptype::WebDigitalNonMetro;
    }

    // In state without a metro/non-metro match, or in country with any validation gap.
    Ptype::WebDigitalTemporary
}

fn standard_resident_ptype(facts: &LocationFacts) -> Ptype {
    if !facts.verified_home() {
        return Ptype::StandardTemporary;
    }

    if facts.lives_in_city() || facts.works_in_city {
        Ptype::StandardMetro
    } else if facts.lives_in_state() {
        Ptype::StandardNonMetro
    } else {
        Ptype::StandardTemporary
    }
}

/// Whole years between `birthdate` and `today`.
pub fn age_on(birthdate: NaiveDate, today: NaiveDate) -> u32 {
    today.years_since(birthdate).unwrap_or(0)
}

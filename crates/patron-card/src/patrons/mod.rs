//! Patron eligibility and library-card provisioning.
//!
//! A card application flows through [`CardValidationPipeline`] (terms, required fields,
//! age, formats, username, address), is classified by [`PolicyEngine`], gets a barcode from
//! [`BarcodeAllocator`], and is created in the ILS through [`IdentityGateway`]. Dependent
//! cards are additionally linked to their parent by [`DependentAccounts`].

pub mod address;
pub mod barcode;
pub mod dependents;
pub mod domain;
pub mod ils;
pub mod luhn;
pub mod policy;
pub mod router;
pub mod service;
pub mod username;
pub mod validation;

#[cfg(test)]
mod tests;

pub use address::{AddressValidator, AddressVendorError, AddressVerdict, ServiceObjectsClient};
pub use barcode::{
    AlertError, AlertPublisher, AllocationError, BarcodeAllocator, BarcodeFamily, BarcodeRecord,
    BarcodeStore, InMemoryBarcodeStore, PgBarcodeStore, StoreError, SupplyAlert,
};
pub use dependents::{
    DependentAccounts, DependentError, DependentLinks, Eligibility, IneligibleReason, LinkError,
};
pub use domain::{
    Address, Barcode, Card, DeclaredLocation, PatronId, PolicyType, ValidCard, VarField,
};
pub use ils::{GatewayError, IdentifierKind, IdentityGateway, IlsClient, Patron, PatronUpdate};
pub use policy::{Classification, Jurisdiction, LocationFacts, PolicyEngine, Ptype, Residence};
pub use router::patron_router;
pub use service::{
    CardIssuanceService, CreatedPatron, DependentRequest, IssuanceError, IssuanceSettings,
};
pub use username::{UsernameCheck, UsernameError, UsernameValidator};
pub use validation::{CardValidationPipeline, PipelineError, Validation};

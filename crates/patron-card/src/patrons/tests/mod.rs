mod barcode;
mod common;
mod dependents;
mod routing;

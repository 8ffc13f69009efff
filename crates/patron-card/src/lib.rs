pub mod config;
pub mod error;
pub mod patrons;
pub mod telemetry;

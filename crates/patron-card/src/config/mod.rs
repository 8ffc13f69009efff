use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use url::Url;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub ils: IlsConfig,
    pub address_vendor: AddressVendorConfig,
    pub barcodes: BarcodeConfig,
    pub store: StoreConfig,
    pub policy: PolicyConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let ils = IlsConfig {
            base_url: required_url("ILS_BASE_URL")?,
            client_id: required("ILS_CLIENT_ID")?,
            client_secret: required("ILS_CLIENT_SECRET")?,
            timeout_secs: number_or("ILS_TIMEOUT_SECS", 10)?,
        };

        let address_vendor = AddressVendorConfig {
            base_url: match env::var("ADDRESS_VENDOR_URL") {
                Ok(raw) => parse_url("ADDRESS_VENDOR_URL", &raw)?,
                Err(_) => parse_url("ADDRESS_VENDOR_URL", DEFAULT_ADDRESS_VENDOR_URL)?,
            },
            license_key: required("ADDRESS_VENDOR_LICENSE_KEY")?,
            timeout_secs: number_or("ADDRESS_VENDOR_TIMEOUT_SECS", 10)?,
        };

        let barcodes = BarcodeConfig {
            prefix: env::var("BARCODE_PREFIX").unwrap_or_else(|_| "28888".to_string()),
            length: number_or("BARCODE_LENGTH", 14)?,
            max_attempts: number_or("BARCODE_MAX_ATTEMPTS", 10)?,
        };
        if barcodes.length != 14 && barcodes.length != 16 {
            return Err(ConfigError::InvalidNumber {
                var: "BARCODE_LENGTH",
            });
        }

        let store = StoreConfig {
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        };

        let policy = PolicyConfig {
            jurisdiction_state: env::var("JURISDICTION_STATE")
                .map(|state| state.trim().to_ascii_uppercase())
                .unwrap_or_else(|_| "NY".to_string()),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            ils,
            address_vendor,
            barcodes,
            store,
            policy,
        })
    }
}

const DEFAULT_ADDRESS_VENDOR_URL: &str =
    "https://sws.serviceobjects.com/AV3/api.svc/GetBestMatchesJson";

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Connection settings for the remote ILS patron API.
#[derive(Clone)]
pub struct IlsConfig {
    pub base_url: Url,
    pub client_id: String,
    pub client_secret: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for IlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IlsConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Connection settings for the address verification vendor.
#[derive(Clone)]
pub struct AddressVendorConfig {
    pub base_url: Url,
    pub license_key: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for AddressVendorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressVendorConfig")
            .field("base_url", &self.base_url)
            .field("license_key", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Barcode family handed out to new patrons.
#[derive(Debug, Clone)]
pub struct BarcodeConfig {
    pub prefix: String,
    pub length: usize,
    pub max_attempts: u32,
}

/// Local barcode store selection. An absent database URL selects the in-memory store.
#[derive(Clone, Default)]
pub struct StoreConfig {
    pub database_url: Option<String>,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Jurisdiction used to decide city/state residency during classification.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub jurisdiction_state: String,
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing { var }),
    }
}

fn required_url(var: &'static str) -> Result<Url, ConfigError> {
    let raw = required(var)?;
    parse_url(var, &raw)
}

fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { var, source })
}

fn number_or<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { var }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    Missing { var: &'static str },
    InvalidNumber { var: &'static str },
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::Missing { var } => write!(f, "{var} must be set"),
            ConfigError::InvalidNumber { var } => write!(f, "{var} is not a valid value"),
            ConfigError::InvalidUrl { var, .. } => write!(f, "{var} must be an absolute URL"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidUrl { source, .. } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::Missing { .. }
            | ConfigError::InvalidNumber { .. } => None,
        }
    }
}

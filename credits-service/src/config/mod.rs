//! Configuration module for credits-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CreditsConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub object_store: ObjectStoreConfig,
    pub transcription: TranscriptionConfig,
    /// Service-to-service writers. Internal routes are not mounted without it.
    pub internal_caller: Option<InternalCallerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Postgres(DatabaseConfig),
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub path: PathBuf,
    pub public_url: String,
    pub signing_secret: String,
    pub signed_url_ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalCallerConfig {
    pub client_id: String,
    pub signing_secret: String,
}

#[derive(Debug, Clone)]
pub enum TranscriptionConfig {
    Http { endpoint: String, timeout: Duration },
    Mock,
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl CreditsConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let store = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .as_str()
        {
            "postgres" => StoreConfig::Postgres(DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parsed("DATABASE_MIN_CONNECTIONS", 2),
            }),
            "memory" => StoreConfig::Memory,
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "STORE_BACKEND must be 'postgres' or 'memory', got '{}'",
                    other
                )))
            }
        };

        let transcription = match env::var("TRANSCRIPTION_BACKEND")
            .unwrap_or_else(|_| "mock".to_string())
            .as_str()
        {
            "http" => TranscriptionConfig::Http {
                endpoint: env::var("TRANSCRIPTION_ENDPOINT").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "TRANSCRIPTION_ENDPOINT is required for the http backend"
                    ))
                })?,
                timeout: Duration::from_secs(parsed("TRANSCRIPTION_TIMEOUT_SECONDS", 120)),
            },
            "mock" => TranscriptionConfig::Mock,
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "TRANSCRIPTION_BACKEND must be 'http' or 'mock', got '{}'",
                    other
                )))
            }
        };

        let signing_secret = env::var("OBJECT_STORE_SIGNING_SECRET").map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("OBJECT_STORE_SIGNING_SECRET is required"))
        })?;

        let internal_caller = match (
            env::var("INTERNAL_CLIENT_ID").ok(),
            env::var("INTERNAL_SIGNING_SECRET").ok(),
        ) {
            (Some(client_id), Some(signing_secret)) => Some(InternalCallerConfig {
                client_id,
                signing_secret,
            }),
            (None, None) => None,
            _ => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "INTERNAL_CLIENT_ID and INTERNAL_SIGNING_SECRET must be set together"
                )))
            }
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "credits-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            store,
            object_store: ObjectStoreConfig {
                path: env::var("OBJECT_STORE_PATH")
                    .unwrap_or_else(|_| "storage".to_string())
                    .into(),
                public_url: env::var("OBJECT_STORE_PUBLIC_URL")
                    .unwrap_or_else(|_| "http://localhost:8080/objects".to_string()),
                signing_secret,
                // One year.
                signed_url_ttl_seconds: parsed("SIGNED_URL_TTL_SECONDS", 31_536_000),
            },
            transcription,
            internal_caller,
        })
    }
}

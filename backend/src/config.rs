//! Connection configuration for the synchronized (remote) document store.
//!
//! All required parameters are sourced from the environment. When any are
//! missing, store initialization is prevented with a single error naming
//! exactly the missing keys, so a misconfigured deployment is diagnosable
//! from the message alone.

use crate::errors::DataError;

pub const ENV_API_KEY: &str = "ASISTENCIA_API_KEY";
pub const ENV_AUTH_DOMAIN: &str = "ASISTENCIA_AUTH_DOMAIN";
pub const ENV_PROJECT_ID: &str = "ASISTENCIA_PROJECT_ID";
pub const ENV_STORAGE_BUCKET: &str = "ASISTENCIA_STORAGE_BUCKET";
pub const ENV_SENDER_ID: &str = "ASISTENCIA_SENDER_ID";
pub const ENV_APP_ID: &str = "ASISTENCIA_APP_ID";
pub const ENV_MEASUREMENT_ID: &str = "ASISTENCIA_MEASUREMENT_ID";

const REQUIRED_KEYS: [&str; 6] = [
    ENV_API_KEY,
    ENV_AUTH_DOMAIN,
    ENV_PROJECT_ID,
    ENV_STORAGE_BUCKET,
    ENV_SENDER_ID,
    ENV_APP_ID,
];

/// Validated connection parameters. Constructing one is the only way to
/// initialize the synchronized store, so missing parameters fail early.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub api_key: String,
    pub auth_domain: String,
    pub project_id: String,
    pub storage_bucket: String,
    pub sender_id: String,
    pub app_id: String,
    /// Optional analytics id; absence is not an error.
    pub measurement_id: Option<String>,
}

impl SyncConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, DataError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an injected lookup. Tests use this to
    /// avoid mutating process-global environment state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DataError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| read(key).is_none())
            .collect();

        if !missing.is_empty() {
            return Err(DataError::Validation(format!(
                "Faltan variables de configuración. Por favor, configura las siguientes \
                 claves en tu archivo .env o en tu entorno de despliegue: {}.",
                missing.join(", ")
            )));
        }

        Ok(Self {
            api_key: read(ENV_API_KEY).unwrap(),
            auth_domain: read(ENV_AUTH_DOMAIN).unwrap(),
            project_id: read(ENV_PROJECT_ID).unwrap(),
            storage_bucket: read(ENV_STORAGE_BUCKET).unwrap(),
            sender_id: read(ENV_SENDER_ID).unwrap(),
            app_id: read(ENV_APP_ID).unwrap(),
            measurement_id: read(ENV_MEASUREMENT_ID),
        })
    }
}

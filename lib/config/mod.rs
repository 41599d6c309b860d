use std::env;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] env::VarError),

    #[error("Invalid value for N_WORKERS: {0}")]
    InvalidNWorkers(String),

    #[error("Invalid value for BIND_ADDR: {0}")]
    InvalidBindAddr(String),
}

/// Static per-deployment credential set sent on every PSA call.
#[derive(Clone)]
pub struct PsaCredentials {
    pub integration_code: String,
    pub username: String,
    pub secret: String,
}

pub struct Config {
    pub psa_api_url: String,
    pub psa_credentials: PsaCredentials,
    pub db_url: String,
    pub redis_url: String,
    /// Default: 3. Caps concurrent PSA calls process-wide.
    pub n_workers: usize,
    /// HTTP/WebSocket listen address. Default: 0.0.0.0:3000.
    pub bind_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let psa_api_url = env::var("PSA_API_URL").unwrap_or_else(|_| {
            "https://webservices16.autotask.net/ATServicesRest/V1.0".to_string()
        });

        let psa_credentials = PsaCredentials {
            integration_code: env::var("PSA_INTEGRATION_CODE")
                .map_err(|_| ConfigError::MissingEnvVar("PSA_INTEGRATION_CODE".to_string()))?,
            username: env::var("PSA_USERNAME")
                .map_err(|_| ConfigError::MissingEnvVar("PSA_USERNAME".to_string()))?,
            secret: env::var("PSA_SECRET")
                .map_err(|_| ConfigError::MissingEnvVar("PSA_SECRET".to_string()))?,
        };

        let db_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let redis_url = env::var("REDIS_URL")
            .map_err(|_| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?;

        let n_workers = match env::var("N_WORKERS") {
            Ok(val) => val
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidNWorkers(val))?,
            Err(_) => 3,
        };

        let bind_addr = match env::var("BIND_ADDR") {
            Ok(val) => val
                .parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidBindAddr(val))?,
            Err(_) => SocketAddr::from(([0, 0, 0, 0], 3000)),
        };

        Ok(Self {
            psa_api_url,
            psa_credentials,
            db_url,
            redis_url,
            n_workers,
            bind_addr,
        })
    }
}

//! Environment-driven configuration.
//!
//! Every knob comes from the deployment environment (a `.env` file is
//! honored when present); CLI flags override the bind address only.

use drover_core::DispatchConfig;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEV_JWT_SECRET: &str = "drover-dev-secret-change-me";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub exp_min: i64,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub store_url: String,
    pub cors_origins: Vec<String>,
    pub dispatch: DispatchConfig,
    pub sweeper_enabled: bool,
    pub sweep_interval: Duration,
    pub auth: AuthConfig,
    pub blob_root: PathBuf,
    pub blob_public_base: String,
}

fn var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
        }),
        None => Ok(default),
    }
}

fn bool_var(name: &'static str, default: bool) -> bool {
    match var(name) {
        Some(raw) => matches!(
            raw.to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
        None => default,
    }
}

fn csv_var(name: &'static str) -> Vec<String> {
    var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind = parse_var(
            "DROVER_BIND",
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap(),
        )?;

        let dispatch = DispatchConfig {
            lease_timeout_sec: parse_var("JOB_LEASE_TIMEOUT_SEC", 180)?,
            total_job_timeout_sec: parse_var("TOTAL_JOB_TIMEOUT_SEC", 300)?,
            max_retries: parse_var("MAX_RETRIES", 3)?,
            events_max: parse_var("EVENTS_MAX", 200)?,
            p0_enabled: bool_var("P0_ENABLED", true),
            priority_ips: csv_var("PRIORITY_IPS").into_iter().collect::<HashSet<_>>(),
            heartbeat_stale_sec: parse_var("HEARTBEAT_STALE_SEC", 30)?,
            input_url_ttl_sec: parse_var("SIGN_INPUT_TTL_SEC", 3600)?,
            output_url_ttl_sec: parse_var("SIGN_OUTPUT_TTL_SEC", 86_400)?,
        };

        let mut cors_origins = csv_var("CORS_ORIGINS");
        if cors_origins.is_empty() {
            cors_origins = vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ];
        }

        let auth = AuthConfig {
            jwt_secret: var("JWT_SECRET").unwrap_or_else(|| {
                tracing::warn!("JWT_SECRET unset; using the development secret");
                DEV_JWT_SECRET.to_string()
            }),
            issuer: var("JWT_ISS").unwrap_or_else(|| "drover".to_string()),
            audience: var("JWT_AUD").unwrap_or_else(|| "drover-admin".to_string()),
            exp_min: parse_var("JWT_EXP_MIN", 720)?,
            admin_username: var("ADMIN_USERNAME"),
            admin_password: var("ADMIN_PASSWORD"),
        };

        let blob_public_base = var("BLOB_PUBLIC_BASE")
            .unwrap_or_else(|| format!("http://{bind}"));

        Ok(Config {
            bind,
            store_url: var("STORE_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379/0".to_string()),
            cors_origins,
            dispatch,
            sweeper_enabled: bool_var("LEASE_SWEEPER_ENABLED", false),
            sweep_interval: Duration::from_secs(parse_var("LEASE_SWEEP_SEC", 2)?),
            auth,
            blob_root: var("BLOB_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./blobs")),
            blob_public_base,
        })
    }

    /// True when the coordination store should be the in-process one.
    pub fn store_is_memory(&self) -> bool {
        self.store_url.starts_with("memory://")
    }
}

use crate::services::{
    share_service::DEFAULT_RETENTION_HOURS,
    sweeper::{DEFAULT_ORPHAN_GRACE_SECS, DEFAULT_SWEEP_INTERVAL_SECS},
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
/// One year.
const MAX_RETENTION_HOURS: i64 = 24 * 365;
/// Payloads are written before their records exist, so the orphan grace
/// period must outlast the slowest upload accepted.
const MIN_ORPHAN_GRACE_SECS: u64 = 600;
/// Thirty days.
const MAX_ORPHAN_GRACE_SECS: u64 = 30 * 24 * 3600;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub retention_hours: i64,
    pub sweep_interval_secs: u64,
    pub orphan_grace_secs: u64,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Expiring, password-protected file sharing")]
pub struct Args {
    /// Host to bind to (overrides TEMPSHARE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TEMPSHARE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where payloads are stored (overrides TEMPSHARE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides TEMPSHARE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Secret used to verify bearer tokens (overrides TEMPSHARE_JWT_SECRET)
    #[arg(long)]
    pub jwt_secret: Option<String>,

    /// Hours a shared file stays available (overrides TEMPSHARE_RETENTION_HOURS)
    #[arg(long)]
    pub retention_hours: Option<i64>,

    /// Seconds between expiry sweeps (overrides TEMPSHARE_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Minimum age before an unreferenced payload is removed
    /// (overrides TEMPSHARE_ORPHAN_GRACE_SECS)
    #[arg(long)]
    pub orphan_grace_secs: Option<u64>,

    /// Request body limit in bytes (overrides TEMPSHARE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("TEMPSHARE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_storage =
            env::var("TEMPSHARE_STORAGE_DIR").unwrap_or_else(|_| "./data/files".into());
        let env_db = env::var("TEMPSHARE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/tempshare.db".into());

        let jwt_secret = match args.jwt_secret {
            Some(secret) => secret,
            None => match env::var("TEMPSHARE_JWT_SECRET") {
                Ok(secret) => secret,
                Err(_) => {
                    tracing::warn!("TEMPSHARE_JWT_SECRET not set, using an insecure development secret");
                    "dev-secret-change-me".into()
                }
            },
        };
        if jwt_secret.is_empty() {
            anyhow::bail!("JWT secret must not be empty");
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: pick(args.port, "TEMPSHARE_PORT", 8080)?,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            jwt_secret,
            retention_hours: pick(
                args.retention_hours,
                "TEMPSHARE_RETENTION_HOURS",
                DEFAULT_RETENTION_HOURS,
            )?,
            sweep_interval_secs: pick(
                args.sweep_interval_secs,
                "TEMPSHARE_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )?,
            orphan_grace_secs: pick(
                args.orphan_grace_secs,
                "TEMPSHARE_ORPHAN_GRACE_SECS",
                DEFAULT_ORPHAN_GRACE_SECS,
            )?,
            max_upload_bytes: pick(
                args.max_upload_bytes,
                "TEMPSHARE_MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
        };

        if !(1..=MAX_RETENTION_HOURS).contains(&cfg.retention_hours) {
            anyhow::bail!(
                "retention hours must be between 1 and {}, got {}",
                MAX_RETENTION_HOURS,
                cfg.retention_hours
            );
        }
        if !(MIN_ORPHAN_GRACE_SECS..=MAX_ORPHAN_GRACE_SECS).contains(&cfg.orphan_grace_secs) {
            anyhow::bail!(
                "orphan grace must be between {} and {} seconds, got {}",
                MIN_ORPHAN_GRACE_SECS,
                MAX_ORPHAN_GRACE_SECS,
                cfg.orphan_grace_secs
            );
        }
        if cfg.sweep_interval_secs == 0 {
            anyhow::bail!("sweep interval must be at least one second");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI value, else the parsed environment variable, else `default`.
fn pick<T>(cli: Option<T>, var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match env::var(var) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", var, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", var)),
    }
}

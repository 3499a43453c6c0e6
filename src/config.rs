//! Process configuration loaded once at startup from the environment.

use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProvider {
    Local,
    Aws,
    Gcp,
}

impl std::str::FromStr for StorageProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(StorageProvider::Local),
            "aws" => Ok(StorageProvider::Aws),
            "gcp" => Ok(StorageProvider::Gcp),
            other => anyhow::bail!("unknown storage provider '{other}' (expected local|aws|gcp)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    pub bucket: String,
    pub subpath: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub grpc_port: u16,
    pub api_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub updates_queue_name: String,
    /// Number of worker loops to run in this process. Zero means API-only.
    pub updates_queue_process: u32,
    pub input_storage: StorageConfig,
    pub output_storage: StorageConfig,
    pub openid_issuer: Option<String>,
    pub openid_audience: Option<String>,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env if present; ignore if missing (production relies on real env vars).
        let _ = dotenvy::dotenv();

        let grpc_port = env_parse("GRPC_PORT", 50051)?;
        let api_port = env_parse("API_PORT", 8080)?;

        let database_url = require_env("DATABASE_URL")?;
        let redis_url = require_env("REDIS_URL")?;

        let updates_queue_name =
            std::env::var("UPDATES_QUEUE_NAME").unwrap_or_else(|_| "updates".to_string());
        let updates_queue_process = env_parse("UPDATES_QUEUE_PROCESS", 1u32)?;

        let input_storage = StorageConfig {
            provider: env_var_or("INPUT_STORAGE_PROVIDER", "local")?.parse()?,
            bucket: std::env::var("INPUT_STORAGE_BUCKET").unwrap_or_default(),
            subpath: std::env::var("INPUT_STORAGE_SUBPATH").unwrap_or_default(),
        };
        let output_storage = StorageConfig {
            provider: env_var_or("OUTPUT_STORAGE_PROVIDER", "local")?.parse()?,
            bucket: std::env::var("OUTPUT_STORAGE_BUCKET").unwrap_or_default(),
            subpath: std::env::var("OUTPUT_STORAGE_SUBPATH").unwrap_or_default(),
        };

        let openid_issuer = std::env::var("OPENID_ISSUER").ok();
        let openid_audience = std::env::var("OPENID_AUDIENCE").ok();

        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let config = Config {
            grpc_port,
            api_port,
            database_url,
            redis_url,
            updates_queue_name,
            updates_queue_process,
            input_storage,
            output_storage,
            openid_issuer,
            openid_audience,
            cors_origins,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.grpc_port == self.api_port {
            anyhow::bail!("GRPC_PORT and API_PORT must differ");
        }
        Ok(())
    }

    pub fn api_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.api_port))
    }

    pub fn grpc_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.grpc_port))
    }
}

fn require_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing required environment variable {key}"))
}

fn env_var_or(key: &str, default: &str) -> anyhow::Result<String> {
    Ok(std::env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

use crate::{models::bucket::DEFAULT_EXPIRY_DAYS, policy::UploadPolicy};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, fmt, path::PathBuf, str::FromStr};

/// Which backend stores uploaded files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StorageMode {
    /// Files on the local filesystem.
    Local,
    /// An S3-compatible object store.
    #[value(alias = "minio")]
    S3,
}

/// Connection settings for the remote object store.
#[derive(Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageMode,
    /// Root directory of the local backend.
    pub static_dir: PathBuf,
    /// Prefix of the location strings returned to clients.
    pub static_location: String,
    pub upload_policy: UploadPolicy,
    pub max_upload_bytes: usize,
    pub s3: S3Config,
    /// Retention for objects in temporary buckets.
    pub temporary_expiry_days: u32,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File upload and display service")]
pub struct Args {
    /// Host to bind to (overrides FILE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides FILE_STORE_STORAGE)
    #[arg(long, value_enum)]
    pub storage: Option<StorageMode>,

    /// Directory where local uploads are stored (overrides FILE_STORE_STATIC_DIR)
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Public prefix of returned locations (overrides FILE_STORE_STATIC_LOCATION)
    #[arg(long)]
    pub static_location: Option<String>,

    /// Only these extensions may be uploaded (overrides FILE_STORE_ALLOW_FILES)
    #[arg(long, value_delimiter = ',')]
    pub allow_files: Option<Vec<String>>,

    /// Extensions that may never be uploaded (overrides FILE_STORE_DENY_FILES)
    #[arg(long, value_delimiter = ',')]
    pub deny_files: Option<Vec<String>>,

    /// Only these content types may be uploaded (overrides FILE_STORE_ALLOW_MEDIA_TYPES)
    #[arg(long, value_delimiter = ',')]
    pub allow_media_types: Option<Vec<String>>,

    /// Content types that may never be uploaded (overrides FILE_STORE_DENY_MEDIA_TYPES)
    #[arg(long, value_delimiter = ',')]
    pub deny_media_types: Option<Vec<String>>,

    /// Maximum request body size in bytes (overrides FILE_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Object store endpoint URL (overrides FILE_STORE_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Object store region (overrides FILE_STORE_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Object store access key (overrides FILE_STORE_S3_ACCESS_KEY)
    #[arg(long)]
    pub s3_access_key: Option<String>,

    /// Object store secret key (overrides FILE_STORE_S3_SECRET_KEY)
    #[arg(long)]
    pub s3_secret_key: Option<String>,

    /// Days before objects in temporary buckets expire (overrides FILE_STORE_TEMPORARY_EXPIRY_DAYS)
    #[arg(long)]
    pub temporary_expiry_days: Option<u32>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    /// Merge already-parsed CLI args over the environment.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_storage = match env::var("FILE_STORE_STORAGE") {
            Ok(value) => <StorageMode as ValueEnum>::from_str(&value, true)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("parsing FILE_STORE_STORAGE value `{}`", value))?,
            Err(env::VarError::NotPresent) => StorageMode::Local,
            Err(err) => return Err(err).context("reading FILE_STORE_STORAGE"),
        };

        let upload_policy = UploadPolicy::new(
            args.allow_files
                .unwrap_or_else(|| env_list("FILE_STORE_ALLOW_FILES")),
            args.deny_files
                .unwrap_or_else(|| env_list("FILE_STORE_DENY_FILES")),
            args.allow_media_types
                .unwrap_or_else(|| env_list("FILE_STORE_ALLOW_MEDIA_TYPES")),
            args.deny_media_types
                .unwrap_or_else(|| env_list("FILE_STORE_DENY_MEDIA_TYPES")),
        );

        // --- Merge ---
        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_or("FILE_STORE_HOST", "0.0.0.0")),
            port: or_env_parsed(args.port, "FILE_STORE_PORT", 3000)?,
            storage: args.storage.unwrap_or(env_storage),
            static_dir: args
                .static_dir
                .unwrap_or_else(|| env_or("FILE_STORE_STATIC_DIR", "./data/static").into()),
            static_location: args
                .static_location
                .unwrap_or_else(|| env_or("FILE_STORE_STATIC_LOCATION", "/file/display")),
            upload_policy,
            max_upload_bytes: or_env_parsed(
                args.max_upload_bytes,
                "FILE_STORE_MAX_UPLOAD_BYTES",
                100 * 1024 * 1024,
            )?,
            s3: S3Config {
                endpoint: args
                    .s3_endpoint
                    .unwrap_or_else(|| env_or("FILE_STORE_S3_ENDPOINT", "http://localhost:9000")),
                region: args
                    .s3_region
                    .unwrap_or_else(|| env_or("FILE_STORE_S3_REGION", "us-east-1")),
                access_key: args
                    .s3_access_key
                    .unwrap_or_else(|| env_or("FILE_STORE_S3_ACCESS_KEY", "minioadmin")),
                secret_key: args
                    .s3_secret_key
                    .unwrap_or_else(|| env_or("FILE_STORE_S3_SECRET_KEY", "minioadmin")),
            },
            temporary_expiry_days: or_env_parsed(
                args.temporary_expiry_days,
                "FILE_STORE_TEMPORARY_EXPIRY_DAYS",
                DEFAULT_EXPIRY_DAYS,
            )?,
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

/// Comma-separated list from the environment; empty when unset.
fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// CLI value if given, else the parsed env var, else `default`.
fn or_env_parsed<T>(cli: Option<T>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let args = Args::try_parse_from([
            "file-store",
            "--port",
            "8080",
            "--storage",
            "minio",
            "--deny-files",
            "exe,sh",
            "--temporary-expiry-days",
            "7",
        ])
        .unwrap();
        let cfg = AppConfig::from_args(args).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.storage, StorageMode::S3);
        assert_eq!(cfg.temporary_expiry_days, 7);
        assert!(cfg.upload_policy.denied("run.sh", None));
        assert!(!cfg.upload_policy.denied("run.txt", None));
    }

    #[test]
    fn test_secret_is_redacted() {
        let cfg = S3Config {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            access_key: "key".into(),
            secret_key: "hunter2".into(),
        };
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}

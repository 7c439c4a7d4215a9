use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr};

const MIB: u64 = 1 << 20;

/// Protocol ceilings enforced by the coordinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    /// Smallest accepted chunk, except for the last one.
    pub chunk_min_size: u64,
    /// Largest accepted chunk.
    pub chunk_max_size: u64,
    /// Highest accepted 1-based chunk number.
    pub max_chunk_number: u32,
    /// Largest file accepted on either path.
    pub max_file_size: u64,
    /// Largest body sent to the backend in one put; bigger files must be chunked.
    pub single_put_limit: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            chunk_min_size: 5 * MIB,
            chunk_max_size: 100 * MIB,
            max_chunk_number: 10_000,
            max_file_size: 1 << 40,
            single_put_limit: 100 * MIB,
        }
    }
}

/// Which object-storage backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Disk,
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(Self::Disk),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown backend `{}` (expected disk or memory)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub backend: BackendKind,
    pub limits: UploadLimits,
    pub public_url: Option<String>,
    pub presign_secret: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Content-addressed file upload service")]
pub struct Args {
    /// Host to bind to (overrides DEDUP_UPLOADER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DEDUP_UPLOADER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides DEDUP_UPLOADER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DEDUP_UPLOADER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage backend (overrides DEDUP_UPLOADER_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Largest single-shot upload in bytes (overrides DEDUP_UPLOADER_SINGLE_PUT_LIMIT)
    #[arg(long)]
    pub single_put_limit: Option<u64>,

    /// Smallest non-final chunk in bytes (overrides DEDUP_UPLOADER_CHUNK_MIN_SIZE)
    #[arg(long)]
    pub chunk_min_size: Option<u64>,

    /// Largest chunk in bytes (overrides DEDUP_UPLOADER_CHUNK_MAX_SIZE)
    #[arg(long)]
    pub chunk_max_size: Option<u64>,

    /// Highest chunk number (overrides DEDUP_UPLOADER_MAX_CHUNK_NUMBER)
    #[arg(long)]
    pub max_chunk_number: Option<u32>,

    /// Largest accepted file in bytes (overrides DEDUP_UPLOADER_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Base URL used when issuing presigned links (overrides DEDUP_UPLOADER_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Secret used to sign presigned links (overrides DEDUP_UPLOADER_PRESIGN_SECRET)
    #[arg(long)]
    pub presign_secret: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |name| env::var(name))?;
        Ok((cfg, migrate))
    }

    /// Merge CLI values over environment values over defaults.
    ///
    /// `lookup` stands in for `std::env::var` so the precedence rules can be
    /// exercised without touching the process environment.
    pub fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let defaults = UploadLimits::default();

        let env_host = lookup("DEDUP_UPLOADER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env(&lookup, "DEDUP_UPLOADER_PORT")?.unwrap_or(3000);
        let env_storage =
            lookup("DEDUP_UPLOADER_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = lookup("DEDUP_UPLOADER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/uploader.db".into());
        let env_backend = parse_env(&lookup, "DEDUP_UPLOADER_BACKEND")?.unwrap_or(BackendKind::Disk);
        let env_single = parse_env(&lookup, "DEDUP_UPLOADER_SINGLE_PUT_LIMIT")?
            .unwrap_or(defaults.single_put_limit);
        let env_min =
            parse_env(&lookup, "DEDUP_UPLOADER_CHUNK_MIN_SIZE")?.unwrap_or(defaults.chunk_min_size);
        let env_max =
            parse_env(&lookup, "DEDUP_UPLOADER_CHUNK_MAX_SIZE")?.unwrap_or(defaults.chunk_max_size);
        let env_count = parse_env(&lookup, "DEDUP_UPLOADER_MAX_CHUNK_NUMBER")?
            .unwrap_or(defaults.max_chunk_number);
        let env_file_size = parse_env(&lookup, "DEDUP_UPLOADER_MAX_FILE_SIZE")?
            .unwrap_or(defaults.max_file_size);

        let limits = UploadLimits {
            chunk_min_size: args.chunk_min_size.unwrap_or(env_min),
            chunk_max_size: args.chunk_max_size.unwrap_or(env_max),
            max_chunk_number: args.max_chunk_number.unwrap_or(env_count),
            max_file_size: args.max_file_size.unwrap_or(env_file_size),
            single_put_limit: args.single_put_limit.unwrap_or(env_single),
        };
        if limits.chunk_min_size > limits.chunk_max_size {
            anyhow::bail!(
                "chunk min size {} is larger than chunk max size {}",
                limits.chunk_min_size,
                limits.chunk_max_size
            );
        }

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            backend: args.backend.unwrap_or(env_backend),
            limits,
            public_url: args
                .public_url
                .or_else(|| lookup("DEDUP_UPLOADER_PUBLIC_URL").ok()),
            presign_secret: args
                .presign_secret
                .or_else(|| lookup("DEDUP_UPLOADER_PRESIGN_SECRET").ok()),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Upper bound for request bodies accepted by the HTTP layer.
    pub fn body_limit(&self) -> usize {
        let largest = self.limits.single_put_limit.max(self.limits.chunk_max_size);
        usize::try_from(largest + MIB).unwrap_or(usize::MAX)
    }
}

fn parse_env<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

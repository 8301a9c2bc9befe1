use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub staging_dir: String,
    pub metadata_backend: MetadataBackend,
    pub database_url: String,
    pub records_file: String,
    pub key_prefix: String,
    pub url_ttl_secs: u32,
    pub verify_before_sign: bool,
    pub max_upload_bytes: usize,
    pub s3: S3Settings,
}

/// Where upload records are persisted.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataBackend {
    /// SQLite database at `database_url`.
    Sqlite,
    /// Append-only JSON Lines file at `records_file`.
    JsonFile,
}

impl FromStr for MetadataBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(value, true)
            .map_err(|_| anyhow::anyhow!("unknown metadata backend `{}`", value))
    }
}

/// Connection settings for the S3-compatible bucket.
#[derive(Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (MinIO, R2). `None` means AWS.
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// What the process should do after loading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Reconcile,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Image upload service backed by S3")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for in-flight uploads (overrides IMAGE_STORE_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<String>,

    /// Metadata backend (overrides IMAGE_STORE_METADATA_BACKEND)
    #[arg(long, value_enum)]
    pub metadata_backend: Option<MetadataBackend>,

    /// Database URL for the sqlite backend (overrides IMAGE_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Records file for the json-file backend (overrides IMAGE_STORE_RECORDS_FILE)
    #[arg(long)]
    pub records_file: Option<String>,

    /// Folder inside the bucket for new objects (overrides IMAGE_STORE_KEY_PREFIX)
    #[arg(long)]
    pub key_prefix: Option<String>,

    /// Lifetime of download URLs in seconds (overrides IMAGE_STORE_URL_TTL_SECS)
    #[arg(long)]
    pub url_ttl_secs: Option<u32>,

    /// Check that an object exists before signing a URL for it
    /// (`--verify-before-sign=false` overrides IMAGE_STORE_VERIFY_BEFORE_SIGN)
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub verify_before_sign: Option<bool>,

    /// Largest accepted upload body (overrides IMAGE_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Bucket name (overrides AWS_BUCKET_NAME)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides AWS_BUCKET_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// S3-compatible endpoint URL (overrides S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "reconcile")]
    pub migrate: bool,

    /// Report stored objects that have no record, then exit
    #[arg(long)]
    pub reconcile: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::from_args(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge parsed args over values looked up by `env`.
    pub fn from_args(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<(Self, RunMode)> {
        // --- Environment fallback ---
        let env_host = env("IMAGE_STORE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_env(&env, "IMAGE_STORE_PORT")?.unwrap_or(8080);
        let env_staging = env("IMAGE_STORE_STAGING_DIR").unwrap_or_else(|| "./uploads".into());
        let env_backend =
            parse_env(&env, "IMAGE_STORE_METADATA_BACKEND")?.unwrap_or(MetadataBackend::Sqlite);
        let env_db = env("IMAGE_STORE_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/uploads.db".into());
        let env_records = env("IMAGE_STORE_RECORDS_FILE")
            .unwrap_or_else(|| "./data/meta/records.jsonl".into());
        let env_prefix = env("IMAGE_STORE_KEY_PREFIX").unwrap_or_else(|| "sample-folder-1".into());
        let env_ttl = parse_env(&env, "IMAGE_STORE_URL_TTL_SECS")?.unwrap_or(900);
        let env_verify = parse_env(&env, "IMAGE_STORE_VERIFY_BEFORE_SIGN")?.unwrap_or(false);
        let env_max_upload =
            parse_env(&env, "IMAGE_STORE_MAX_UPLOAD_BYTES")?.unwrap_or(25 * 1024 * 1024);

        let Some(bucket) = args.bucket.or_else(|| env("AWS_BUCKET_NAME")) else {
            bail!("bucket name is required (--bucket or AWS_BUCKET_NAME)");
        };

        let key_prefix = args
            .key_prefix
            .unwrap_or(env_prefix)
            .trim_matches('/')
            .to_string();
        if key_prefix.is_empty() {
            bail!("key prefix must not be empty");
        }

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            staging_dir: args.staging_dir.unwrap_or(env_staging),
            metadata_backend: args.metadata_backend.unwrap_or(env_backend),
            database_url: args.database_url.unwrap_or(env_db),
            records_file: args.records_file.unwrap_or(env_records),
            key_prefix,
            url_ttl_secs: args.url_ttl_secs.unwrap_or(env_ttl),
            verify_before_sign: args.verify_before_sign.unwrap_or(env_verify),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            s3: S3Settings {
                bucket,
                region: args
                    .region
                    .or_else(|| env("AWS_BUCKET_REGION"))
                    .unwrap_or_else(|| "us-east-1".into()),
                endpoint: args.s3_endpoint.or_else(|| env("S3_ENDPOINT")),
                access_key: env("AWS_ACCESS_KEY_ID"),
                secret_key: env("AWS_SECRET_ACCESS_KEY"),
            },
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.reconcile {
            RunMode::Reconcile
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    env(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|err| anyhow::anyhow!("{}", err))
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(argv: &[&str], vars: &[(&str, &str)]) -> Result<(AppConfig, RunMode)> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let args = Args::try_parse_from(std::iter::once("image-store").chain(argv.iter().copied()))?;
        AppConfig::from_args(args, |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_bucket_is_set() {
        let (cfg, mode) = load(&[], &[("AWS_BUCKET_NAME", "photos")]).unwrap();

        assert_eq!(mode, RunMode::Serve);
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.staging_dir, "./uploads");
        assert_eq!(cfg.metadata_backend, MetadataBackend::Sqlite);
        assert_eq!(cfg.key_prefix, "sample-folder-1");
        assert_eq!(cfg.url_ttl_secs, 900);
        assert!(!cfg.verify_before_sign);
        assert_eq!(cfg.s3.region, "us-east-1");
        assert!(cfg.s3.endpoint.is_none());
    }

    #[test]
    fn args_override_environment() {
        let (cfg, mode) = load(
            &["--port", "9000", "--metadata-backend", "json-file", "--migrate"],
            &[
                ("AWS_BUCKET_NAME", "photos"),
                ("IMAGE_STORE_PORT", "7000"),
                ("IMAGE_STORE_METADATA_BACKEND", "sqlite"),
                ("IMAGE_STORE_KEY_PREFIX", "/images/"),
            ],
        )
        .unwrap();

        assert_eq!(mode, RunMode::Migrate);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.metadata_backend, MetadataBackend::JsonFile);
        assert_eq!(cfg.key_prefix, "images");
    }

    #[test]
    fn verify_flag_overrides_environment_both_ways() {
        let bucket = ("AWS_BUCKET_NAME", "photos");
        let env_on = ("IMAGE_STORE_VERIFY_BEFORE_SIGN", "true");

        let (cfg, _) = load(&[], &[bucket, env_on]).unwrap();
        assert!(cfg.verify_before_sign);

        let (cfg, _) = load(&["--verify-before-sign=false"], &[bucket, env_on]).unwrap();
        assert!(!cfg.verify_before_sign);

        let (cfg, _) = load(&["--verify-before-sign"], &[bucket]).unwrap();
        assert!(cfg.verify_before_sign);
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err = load(
            &[],
            &[("AWS_BUCKET_NAME", "photos"), ("IMAGE_STORE_PORT", "eighty")],
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("IMAGE_STORE_PORT"));
    }

    #[test]
    fn bucket_is_required() {
        assert!(load(&[], &[]).is_err());
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let (cfg, _) = load(
            &[],
            &[
                ("AWS_BUCKET_NAME", "photos"),
                ("AWS_ACCESS_KEY_ID", "AKIASECRET"),
                ("AWS_SECRET_ACCESS_KEY", "very-secret"),
            ],
        )
        .unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("AKIASECRET"));
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}

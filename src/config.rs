use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub key_namespace: String,
    pub max_upload_bytes: usize,
    pub object_store: ObjectStoreConfig,
}

#[derive(Debug, Clone)]
pub enum ObjectStoreConfig {
    S3(S3Settings),
    Local(LocalSettings),
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub storage_dir: String,
    pub public_url: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    S3,
    Local,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Image upload and storage API")]
pub struct Args {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Metadata database URL (overrides DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Object store backend (overrides OBJECT_STORE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// S3 bucket holding image payloads (overrides S3_BUCKET_NAME)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Custom S3 endpoint, e.g. MinIO (overrides S3_ENDPOINT_URL)
    #[arg(long = "s3-endpoint-url")]
    pub endpoint_url: Option<String>,

    /// Use path-style bucket addressing (overrides S3_FORCE_PATH_STYLE)
    #[arg(long = "s3-force-path-style")]
    pub force_path_style: bool,

    /// Key prefix for uploaded images (overrides IMAGE_KEY_NAMESPACE)
    #[arg(long)]
    pub key_namespace: Option<String>,

    /// Directory for the local backend (overrides LOCAL_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Base URL of local-backend locators (overrides LOCAL_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Largest accepted request body in bytes (overrides MAX_UPLOAD_BYTES)
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
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up through `env`, over defaults.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match args.port {
            Some(port) => port,
            None => env_parse(&env, "PORT")?.unwrap_or(5000),
        };
        let backend = match args.backend {
            Some(backend) => backend,
            None => match env("OBJECT_STORE_BACKEND") {
                Some(value) => <Backend as ValueEnum>::from_str(&value, true)
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("parsing OBJECT_STORE_BACKEND value `{}`", value))?,
                None => Backend::S3,
            },
        };

        let object_store = match backend {
            Backend::S3 => {
                let Some(bucket) = args.bucket.or_else(|| env("S3_BUCKET_NAME")) else {
                    bail!("S3_BUCKET_NAME (or --bucket) is required for the s3 backend");
                };
                ObjectStoreConfig::S3(S3Settings {
                    bucket,
                    endpoint_url: args.endpoint_url.or_else(|| env("S3_ENDPOINT_URL")),
                    force_path_style: args.force_path_style
                        || env_flag(&env, "S3_FORCE_PATH_STYLE")?,
                })
            }
            Backend::Local => ObjectStoreConfig::Local(LocalSettings {
                storage_dir: args
                    .storage_dir
                    .or_else(|| env("LOCAL_STORAGE_DIR"))
                    .unwrap_or_else(|| "./data/objects".into()),
                public_url: args
                    .public_url
                    .or_else(|| env("LOCAL_PUBLIC_URL"))
                    .unwrap_or_else(|| format!("http://localhost:{}", port)),
            }),
        };

        Ok(Self {
            host: args
                .host
                .or_else(|| env("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            database_url: args
                .database_url
                .or_else(|| env("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/images.db".into()),
            key_namespace: args
                .key_namespace
                .or_else(|| env("IMAGE_KEY_NAMESPACE"))
                .unwrap_or_else(|| "Raw-images".into()),
            max_upload_bytes: match args.max_upload_bytes {
                Some(limit) => limit,
                None => env_parse(&env, "MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            },
            object_store,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}

fn env_flag(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<bool> {
    match env(name).as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("") | Some("0") | Some("false") => Ok(false),
        Some("1") | Some("true") => Ok(true),
        Some(other) => bail!("parsing {} value `{}`: expected true or false", name, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(argv: &[&str], vars: &[(&str, &str)]) -> Result<AppConfig> {
        let args = Args::try_parse_from(std::iter::once("image-store").chain(argv.iter().copied()))?;
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(args, |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_with_bucket_from_env() {
        let cfg = resolve(&[], &[("S3_BUCKET_NAME", "photos")]).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:5000");
        assert_eq!(cfg.key_namespace, "Raw-images");
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        match cfg.object_store {
            ObjectStoreConfig::S3(s3) => {
                assert_eq!(s3.bucket, "photos");
                assert_eq!(s3.endpoint_url, None);
                assert!(!s3.force_path_style);
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn s3_backend_requires_a_bucket() {
        assert!(resolve(&[], &[]).is_err());
    }

    #[test]
    fn cli_overrides_env() {
        let cfg = resolve(
            &["--port", "8080", "--bucket", "cli-bucket", "--s3-force-path-style"],
            &[("PORT", "9090"), ("S3_BUCKET_NAME", "env-bucket")],
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        match cfg.object_store {
            ObjectStoreConfig::S3(s3) => {
                assert_eq!(s3.bucket, "cli-bucket");
                assert!(s3.force_path_style);
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn local_backend_defaults_public_url_to_port() {
        let cfg = resolve(&[], &[("OBJECT_STORE_BACKEND", "local"), ("PORT", "7000")]).unwrap();
        match cfg.object_store {
            ObjectStoreConfig::Local(local) => {
                assert_eq!(local.storage_dir, "./data/objects");
                assert_eq!(local.public_url, "http://localhost:7000");
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(resolve(&[], &[("S3_BUCKET_NAME", "b"), ("PORT", "http")]).is_err());
        assert!(resolve(&[], &[("S3_BUCKET_NAME", "b"), ("S3_FORCE_PATH_STYLE", "maybe")]).is_err());
        assert!(resolve(&[], &[("OBJECT_STORE_BACKEND", "ftp")]).is_err());
    }
}

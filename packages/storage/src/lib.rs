//! Object storage for user data exports and, optionally, actor state.
//!
//! [`Storage`] wraps an `object_store` backend (S3-compatible, local
//! filesystem or in-memory) behind an optional key prefix. Exports are
//! written as JSON documents; [`ObjectStateStore`] keeps actor state in the
//! same bucket under `state/`.

mod state_store;

pub use state_store::ObjectStateStore;

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};

const DEFAULT_FS_ROOT: &str = "./data/object_store";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        })
    }
}

/// S3-compatible bucket settings. Credentials left unset are picked up
/// from the ambient AWS environment.
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub virtual_hosted_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Config {
    /// Reads `S3_BUCKET` (required), `AWS_REGION` (default `us-east-1`),
    /// `S3_ENDPOINT`, `S3_ALLOW_HTTP` (defaults to true for `http://`
    /// endpoints), `S3_VIRTUAL_HOSTED_STYLE`, `AWS_ACCESS_KEY_ID` and
    /// `AWS_SECRET_ACCESS_KEY`.
    pub fn from_env() -> Result<Self, StorageError> {
        let bucket = env("S3_BUCKET").ok_or_else(|| {
            StorageError::InvalidConfig("S3_BUCKET is required for the s3 backend".into())
        })?;
        let endpoint = env("S3_ENDPOINT");
        let plain_http = endpoint
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://"));

        Ok(Self {
            bucket,
            region: env("AWS_REGION").unwrap_or_else(|| "us-east-1".into()),
            allow_http: env_flag("S3_ALLOW_HTTP")?.unwrap_or(plain_http),
            virtual_hosted_style: env_flag("S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false),
            access_key_id: env("AWS_ACCESS_KEY_ID"),
            secret_access_key: env("AWS_SECRET_ACCESS_KEY"),
            endpoint,
        })
    }

    fn build(self) -> Result<object_store::aws::AmazonS3, StorageError> {
        let mut builder = object_store::aws::AmazonS3Builder::new()
            .with_bucket_name(self.bucket)
            .with_region(self.region)
            .with_allow_http(self.allow_http)
            .with_virtual_hosted_style_request(self.virtual_hosted_style);
        if let Some(endpoint) = self.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(key) = self.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = self.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        Ok(builder.build()?)
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Prepended to every object key, e.g. `tenancy/`.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
        }
    }

    /// `STORAGE_BACKEND` picks `s3`, `filesystem` (the default, rooted at
    /// `STORAGE_FS_ROOT`) or `memory`. `STORAGE_PREFIX` sets the key prefix.
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = match env("STORAGE_BACKEND").as_deref() {
            Some("s3") => StorageBackendConfig::S3(S3Config::from_env()?),
            Some("memory" | "mem") => StorageBackendConfig::Memory,
            None | Some("filesystem" | "fs") => StorageBackendConfig::Filesystem {
                root: env("STORAGE_FS_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FS_ROOT)),
            },
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };
        Ok(Self {
            backend,
            prefix: env("STORAGE_PREFIX"),
        })
    }
}

/// Handle to the configured bucket. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Storage {
    kind: StorageKind,
    objects: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl Storage {
    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, objects): (StorageKind, Arc<dyn ObjectStore>) = match cfg.backend {
            StorageBackendConfig::S3(s3) => (StorageKind::S3, Arc::new(s3.build()?)),
            StorageBackendConfig::Filesystem { root } => {
                tokio::fs::create_dir_all(&root).await?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs))
            }
            StorageBackendConfig::Memory => (
                StorageKind::Memory,
                Arc::new(object_store::memory::InMemory::new()),
            ),
        };
        let prefix = cfg
            .prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());

        tracing::debug!(%kind, prefix = prefix.as_deref().unwrap_or(""), "object storage ready");
        Ok(Self {
            kind,
            objects,
            prefix,
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// Store a JSON document, replacing any previous one at `key`.
    pub async fn put_json(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.objects.put(&path, PutPayload::from(bytes)).await?;
        Ok(())
    }

    /// Read back a JSON document written with [`put_json`](Self::put_json).
    pub async fn get_json(&self, key: &str) -> Result<serde_json::Value, StorageError> {
        let path = self.object_path(key)?;
        let bytes = self.objects.get(&path).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub(crate) fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    /// Full object path of `key`, prefix included.
    pub(crate) fn object_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(match &self.prefix {
            Some(prefix) => Path::from(format!("{prefix}/{key}")),
            None => Path::from(key),
        })
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(name: &str) -> Result<Option<bool>, StorageError> {
    let Some(raw) = env(name) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(Some(true)),
        "0" | "false" | "no" => Ok(Some(false)),
        _ => Err(StorageError::InvalidConfig(format!(
            "{name}={raw} is not a boolean"
        ))),
    }
}

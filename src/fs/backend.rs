use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::StoreError;
use crate::sync::compression::ContentEncoding;

/// An object as reported by a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    /// Content token reported by the store (an ETag for S3).
    pub fingerprint: String,
    pub size: u64,
}

/// Full listing of a bucket, keyed by object key.
pub type Inventory = HashMap<String, RemoteObject>;

/// Permission attached to uploaded objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Anyone may read the object.
    #[default]
    PublicRead,
    /// Only the bucket owner may read the object.
    Private,
}

impl AccessPolicy {
    /// Parse a canned ACL name as written in config files.
    pub fn parse(name: &str) -> Result<Self, String> {
        match name.to_ascii_lowercase().as_str() {
            "public-read" | "public" => Ok(AccessPolicy::PublicRead),
            "private" => Ok(AccessPolicy::Private),
            other => Err(format!("unsupported acl '{}'", other)),
        }
    }

    /// S3 canned ACL name.
    pub fn canned_acl(&self) -> &'static str {
        match self {
            AccessPolicy::PublicRead => "public-read",
            AccessPolicy::Private => "private",
        }
    }
}

/// Headers sent with one upload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferHeaders {
    /// Omitted when the type could not be guessed.
    pub content_type: Option<String>,
    pub content_encoding: Option<ContentEncoding>,
    pub access_policy: AccessPolicy,
}

/// Bytes to upload for one object.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Content held in memory, e.g. after gzip.
    Bytes(Arc<Vec<u8>>),
    /// Content streamed from a local file.
    File { path: PathBuf, size: u64 },
}

impl Payload {
    pub fn bytes(data: Vec<u8>) -> Self {
        Payload::Bytes(Arc::new(data))
    }

    /// Number of bytes that will go over the wire.
    pub fn len(&self) -> u64 {
        match self {
            Payload::Bytes(data) => data.len() as u64,
            Payload::File { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole payload into memory.
    pub async fn read_all(&self) -> Result<Vec<u8>, StoreError> {
        match self {
            Payload::Bytes(data) => Ok(data.as_ref().clone()),
            Payload::File { path, .. } => {
                tokio::fs::read(path).await.map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })
            }
        }
    }
}

/// A remote bucket the publisher mirrors into.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object in the bucket, following pagination.
    async fn list_all(&self) -> Result<Inventory, StoreError>;

    /// Create or overwrite `key`.
    async fn put(
        &self,
        key: &str,
        payload: &Payload,
        headers: &TransferHeaders,
    ) -> Result<(), StoreError>;

    /// Remove `key`.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Label used in logs, e.g. `s3://bucket`.
    fn describe(&self) -> String;
}

/// S3-compatible storage providers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum S3Provider {
    #[default]
    Aws,
    DigitalOcean,
    Hetzner,
    MinIO,
    CloudflareR2,
    Wasabi,
    Custom { endpoint: String },
}

impl S3Provider {
    /// Parse a provider name as written in config files and on the CLI.
    pub fn parse(name: &str, endpoint: Option<&str>) -> Result<Self, String> {
        let provider = match name.to_ascii_lowercase().as_str() {
            "aws" | "s3" => S3Provider::Aws,
            "digitalocean" | "do" | "spaces" => S3Provider::DigitalOcean,
            "hetzner" => S3Provider::Hetzner,
            "minio" => S3Provider::MinIO,
            "r2" | "cloudflare" | "cloudflare-r2" => S3Provider::CloudflareR2,
            "wasabi" => S3Provider::Wasabi,
            "custom" => match endpoint {
                Some(endpoint) if !endpoint.is_empty() => S3Provider::Custom {
                    endpoint: endpoint.to_string(),
                },
                _ => return Err("provider 'custom' requires an endpoint".to_string()),
            },
            other => return Err(format!("unknown storage provider '{}'", other)),
        };
        Ok(provider)
    }

    /// Get the endpoint URL for this provider
    pub fn endpoint(&self, region: &str) -> Option<String> {
        match self {
            S3Provider::Aws => None, // Use default AWS endpoint
            S3Provider::DigitalOcean => Some(format!("https://{}.digitaloceanspaces.com", region)),
            S3Provider::Hetzner => Some(format!("https://{}.your-objectstorage.com", region)),
            S3Provider::MinIO => Some("http://localhost:9000".to_string()),
            S3Provider::CloudflareR2 => Some(format!("https://{}.r2.cloudflarestorage.com", region)),
            S3Provider::Wasabi => Some(format!("https://s3.{}.wasabisys.com", region)),
            S3Provider::Custom { endpoint } => Some(endpoint.clone()),
        }
    }

    /// Self-hosted endpoints generally only support path-style requests.
    pub fn force_path_style(&self) -> bool {
        matches!(self, S3Provider::MinIO | S3Provider::Custom { .. })
    }

    /// Get display name for the provider
    pub fn display_name(&self) -> &str {
        match self {
            S3Provider::Aws => "AWS S3",
            S3Provider::DigitalOcean => "DigitalOcean Spaces",
            S3Provider::Hetzner => "Hetzner Object Storage",
            S3Provider::MinIO => "MinIO",
            S3Provider::CloudflareR2 => "Cloudflare R2",
            S3Provider::Wasabi => "Wasabi",
            S3Provider::Custom { endpoint } => endpoint,
        }
    }
}

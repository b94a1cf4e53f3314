use anyhow::Result;
use object_store::{ObjectStore, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory};
use std::sync::Arc;
use url::Url;

use crate::config::StorageConfig;

/// An object store together with what is known about its listing order.
#[derive(Clone, Debug)]
pub struct ObjectStorage {
    pub store: Arc<dyn ObjectStore>,
    /// `true` when `list` yields keys in lexicographic order (S3, in-memory).
    /// The local filesystem walks directories in an unspecified order.
    pub ordered_listing: bool,
}

/// Create the object store described by the storage configuration
pub fn create_object_store(storage_config: &StorageConfig) -> Result<ObjectStorage> {
    let url = Url::parse(&storage_config.dsn)
        .map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", storage_config.dsn, e))?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/storage"
                ));
            }
            Ok(ObjectStorage {
                store: Arc::new(LocalFileSystem::new_with_prefix(path)?),
                ordered_listing: false,
            })
        }
        "memory" => Ok(ObjectStorage {
            store: Arc::new(InMemory::new()),
            ordered_listing: true,
        }),
        "s3" => {
            let builder = create_s3_builder(&url, storage_config)?;
            Ok(ObjectStorage {
                store: Arc::new(builder.build()?),
                ordered_listing: true,
            })
        }
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: file, memory, s3",
            scheme
        )),
    }
}

/// Create an S3 builder from a DSN
/// DSN format: s3://[access_key:secret_key@]host[:port]/bucket
///
/// Credentials set in the configuration win over the ones embedded in the
/// DSN. Nothing is read from the process environment here.
///
/// A configured endpoint wins over the DSN host. A non-AWS host without a
/// configured endpoint is reached over HTTPS unless `allow_http` is set.
pub fn create_s3_builder(dsn: &Url, config: &StorageConfig) -> Result<AmazonS3Builder> {
    let host = dsn
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("Missing S3 host in DSN"))?;
    let port = dsn.port();
    let bucket = dsn.path().trim_matches('/');

    if bucket.is_empty() {
        return Err(anyhow::anyhow!(
            "S3 DSN must specify a bucket: s3://host/bucket"
        ));
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region(&config.region);

    let access_key = config
        .access_key_id
        .as_deref()
        .unwrap_or_else(|| dsn.username());
    let secret_key = config
        .secret_access_key
        .as_deref()
        .or_else(|| dsn.password())
        .unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // Real S3 needs no endpoint; MinIO, Ceph RGW and friends do
    let endpoint = match &config.endpoint {
        Some(endpoint) => Some(endpoint.clone()),
        None if !host.contains("amazonaws.com") => {
            let scheme = if config.allow_http { "http" } else { "https" };
            Some(match port {
                Some(p) => format!("{scheme}://{host}:{p}"),
                None => format!("{scheme}://{host}"),
            })
        }
        None => None,
    };

    if let Some(endpoint) = endpoint {
        if endpoint.starts_with("http://") && !config.allow_http {
            return Err(anyhow::anyhow!(
                "Plaintext S3 endpoint '{endpoint}' requires storage.allow_http"
            ));
        }
        builder = builder
            .with_endpoint(endpoint)
            .with_virtual_hosted_style_request(false);
    }

    Ok(builder.with_allow_http(config.allow_http))
}

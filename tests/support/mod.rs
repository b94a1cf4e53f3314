//! In-memory registry fixtures shared by the integration tests.

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::config::SweepConfig;
use futures::TryStreamExt;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use sweeper::{
    ClusterError, ClusterImageLister, ImageRecord, ObjectStoreBackend, RegistryLayout, Sweeper,
};

pub const ROOT: &str = "docker/registry/v2";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// A registry laid out in an in-memory object store.
pub struct TestRegistry {
    pub store: Arc<InMemory>,
    pub backend: Arc<ObjectStoreBackend>,
}

impl TestRegistry {
    /// Small pages so every scan crosses page boundaries.
    pub fn new() -> Self {
        Self::with_page_size(2)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        let store = Arc::new(InMemory::new());
        let backend = Arc::new(ObjectStoreBackend::new(store.clone(), page_size));
        Self { store, backend }
    }

    pub fn sweeper(&self, config: SweepConfig) -> Sweeper {
        Sweeper::new(
            RegistryLayout::new(ROOT),
            config,
            self.backend.clone(),
            self.backend.clone(),
        )
    }

    pub async fn put(&self, key: &str) -> Result<()> {
        self.store
            .put(
                &ObjectPath::from(format!("{ROOT}/{key}")),
                PutPayload::from_static(b"0123456789"),
            )
            .await
            .with_context(|| format!("Failed to put {key}"))?;
        Ok(())
    }

    pub async fn put_blob(&self, hex: &str) -> Result<()> {
        self.put(&format!("blobs/sha256/{}/{hex}/data", &hex[..2])).await
    }

    /// Layer link plus the blob it points to.
    pub async fn add_layer(&self, repository: &str, hex: &str) -> Result<()> {
        self.put(&format!("repositories/{repository}/_layers/sha256/{hex}/link"))
            .await?;
        self.put_blob(hex).await
    }

    /// Manifest revision link plus the manifest blob.
    pub async fn add_manifest(&self, repository: &str, hex: &str) -> Result<()> {
        self.put(&format!(
            "repositories/{repository}/_manifests/revisions/sha256/{hex}/link"
        ))
        .await?;
        self.put_blob(hex).await
    }

    pub async fn add_upload(&self, repository: &str, session: &str) -> Result<()> {
        self.put(&format!("repositories/{repository}/_uploads/{session}/data"))
            .await
    }

    /// Every key in the store, relative to the registry root.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let prefix = ObjectPath::from(ROOT);
        let mut keys: Vec<String> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| {
                meta.location
                    .as_ref()
                    .trim_start_matches(ROOT)
                    .trim_start_matches('/')
                    .to_string()
            })
            .try_collect()
            .await
            .context("Failed to list registry")?;
        keys.sort();
        Ok(keys)
    }

    pub async fn has_repository(&self, repository: &str) -> Result<bool> {
        let prefix = format!("repositories/{repository}/");
        Ok(self.keys().await?.iter().any(|key| key.starts_with(&prefix)))
    }

    pub async fn has_blob(&self, hex: &str) -> Result<bool> {
        let key = format!("blobs/sha256/{}/{hex}/data", &hex[..2]);
        Ok(self.keys().await?.contains(&key))
    }
}

/// Cluster double returning a fixed image list or a fixed failure.
pub struct FakeCluster {
    images: Result<Vec<ImageRecord>, String>,
}

impl FakeCluster {
    pub fn with_images(digests: &[&str]) -> Self {
        Self {
            images: Ok(digests
                .iter()
                .map(|digest| {
                    ImageRecord::new(*digest, format!("registry.local/ns/app@{digest}"))
                })
                .collect()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            images: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl ClusterImageLister for FakeCluster {
    async fn list_images(&self) -> Result<Vec<ImageRecord>, ClusterError> {
        self.images
            .clone()
            .map_err(|message| ClusterError::Query { message })
    }
}

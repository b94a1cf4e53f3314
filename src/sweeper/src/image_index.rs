//! Digest → image reference lookup over the cluster's image records.

use async_trait::async_trait;
use std::collections::HashMap;

/// One image the cluster knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Canonical `algorithm:hex` digest, compared as an opaque string.
    pub digest: String,
    /// Pull reference, e.g. `registry.example.com/ns/app@sha256:...`
    pub reference: String,
}

impl ImageRecord {
    pub fn new(digest: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
            reference: reference.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("kubernetes API request failed: {0}")]
    Api(#[from] kube::Error),
    #[error("image query failed: {message}")]
    Query { message: String },
}

/// Source of the images the cluster still references.
#[async_trait]
pub trait ClusterImageLister: Send + Sync {
    /// Every image record visible to the caller's credentials.
    async fn list_images(&self) -> Result<Vec<ImageRecord>, ClusterError>;
}

#[derive(Debug, Clone, Default)]
pub struct ImageIndex {
    references: HashMap<String, String>,
}

impl ImageIndex {
    /// Query the cluster once and index the result.
    pub async fn build(lister: &dyn ClusterImageLister) -> Result<Self, ClusterError> {
        let records = lister.list_images().await?;
        let index = Self::from_records(records);

        tracing::info!(images = index.len(), "Built cluster image index");

        Ok(index)
    }

    /// Later records win on duplicate digests.
    pub fn from_records(records: impl IntoIterator<Item = ImageRecord>) -> Self {
        records.into_iter().collect()
    }

    /// Reference recorded for `digest`, if the cluster knows it.
    pub fn reference(&self, digest: &str) -> Option<&str> {
        self.references.get(digest).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

impl FromIterator<ImageRecord> for ImageIndex {
    fn from_iter<T: IntoIterator<Item = ImageRecord>>(iter: T) -> Self {
        Self {
            references: iter
                .into_iter()
                .map(|record| (record.digest, record.reference))
                .collect(),
        }
    }
}

//! Object storage capabilities used by the sweeper.
//!
//! The scanner only needs paginated listing and the executor only needs
//! prefix deletion, so each is its own trait. [`ObjectStoreBackend`] provides
//! both on top of any [`ObjectStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::storage::ObjectStorage;
use futures::{StreamExt, TryStreamExt};
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use object_store::ObjectMeta;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    /// Pass back as `marker` to fetch the next page; `None` on the last page.
    pub next_marker: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("path not found: {path}")]
    NotFound { path: String },
    #[error("object storage request for '{path}' failed: {source}")]
    Backend {
        path: String,
        #[source]
        source: object_store::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    fn from_object_store(path: &str, source: object_store::Error) -> Self {
        match source {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                path: path.to_string(),
            },
            source => StoreError::Backend {
                path: path.to_string(),
                source,
            },
        }
    }
}

/// Paginated, prefix-scoped listing.
#[async_trait]
pub trait ObjectLister: Send + Sync {
    /// List objects below `prefix` whose key sorts strictly after `marker`.
    async fn list_page(&self, prefix: &str, marker: Option<&str>) -> Result<ListPage, StoreError>;
}

/// Deletion of an object tree.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectRemover: Send + Sync {
    /// Delete every object below `path` and return how many were removed.
    ///
    /// Returns [`StoreError::NotFound`] when nothing exists below `path`.
    async fn delete(&self, path: &str) -> Result<usize, StoreError>;
}

/// [`ObjectLister`] and [`ObjectRemover`] over an [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    page_size: usize,
    ordered_listing: bool,
    /// Sorted listings of unordered stores, keyed by prefix, held while a
    /// paginated scan of that prefix is in progress.
    snapshots: Arc<Mutex<HashMap<String, Arc<[ListedObject]>>>>,
}

impl From<ObjectMeta> for ListedObject {
    fn from(meta: ObjectMeta) -> Self {
        Self {
            key: meta.location.to_string(),
            size: meta.size,
            last_modified: meta.last_modified,
        }
    }
}

impl ObjectStoreBackend {
    /// Backend over a store that lists keys in lexicographic order.
    pub fn new(store: Arc<dyn ObjectStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            ordered_listing: true,
            snapshots: Arc::default(),
        }
    }

    pub fn from_storage(storage: &ObjectStorage, page_size: usize) -> Self {
        Self {
            ordered_listing: storage.ordered_listing,
            ..Self::new(storage.store.clone(), page_size)
        }
    }

    /// Treat the store's listing order as unspecified.
    ///
    /// The first page of a scan (no marker) reads the whole prefix once and
    /// sorts it; later pages are served from that snapshot. Keys written
    /// after the first page are picked up by the next scan.
    pub fn with_unordered_listing(mut self) -> Self {
        self.ordered_listing = false;
        self
    }

    fn snapshots(&self) -> MutexGuard<'_, HashMap<String, Arc<[ListedObject]>>> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn list_ordered(&self, prefix: &str, marker: Option<&str>) -> Result<ListPage, StoreError> {
        let prefix_path = ObjectPath::from(prefix);
        let mut stream = match marker {
            Some(marker) => self
                .store
                .list_with_offset(Some(&prefix_path), &ObjectPath::from(marker)),
            None => self.store.list(Some(&prefix_path)),
        };

        let mut objects: Vec<ListedObject> = Vec::with_capacity(self.page_size + 1);
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|source| StoreError::from_object_store(prefix, source))?;
            objects.push(meta.into());
            if objects.len() > self.page_size {
                break;
            }
        }

        let next_marker = if objects.len() > self.page_size {
            objects.truncate(self.page_size);
            objects.last().map(|object| object.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_marker,
        })
    }

    async fn list_unordered(&self, prefix: &str, marker: Option<&str>) -> Result<ListPage, StoreError> {
        let cached = marker.and_then(|_| self.snapshots().get(prefix).cloned());
        let snapshot = match cached {
            Some(snapshot) => snapshot,
            None => {
                let mut listing: Vec<ListedObject> = self
                    .store
                    .list(Some(&ObjectPath::from(prefix)))
                    .map_ok(ListedObject::from)
                    .try_collect()
                    .await
                    .map_err(|source| StoreError::from_object_store(prefix, source))?;
                listing.sort_by(|a, b| a.key.cmp(&b.key));

                let snapshot: Arc<[ListedObject]> = listing.into();
                self.snapshots().insert(prefix.to_string(), snapshot.clone());
                snapshot
            }
        };

        let start = marker.map_or(0, |marker| {
            snapshot.partition_point(|object| object.key.as_str() <= marker)
        });
        let end = snapshot.len().min(start + self.page_size);
        let objects = snapshot[start..end].to_vec();

        let next_marker = if end < snapshot.len() {
            objects.last().map(|object| object.key.clone())
        } else {
            self.snapshots().remove(prefix);
            None
        };

        Ok(ListPage {
            objects,
            next_marker,
        })
    }
}

#[async_trait]
impl ObjectLister for ObjectStoreBackend {
    async fn list_page(&self, prefix: &str, marker: Option<&str>) -> Result<ListPage, StoreError> {
        let page = if self.ordered_listing {
            self.list_ordered(prefix, marker).await?
        } else {
            self.list_unordered(prefix, marker).await?
        };

        tracing::trace!(
            prefix = %prefix,
            marker = ?marker,
            objects = page.objects.len(),
            next_marker = ?page.next_marker,
            "Listed page"
        );

        Ok(page)
    }
}

#[async_trait]
impl ObjectRemover for ObjectStoreBackend {
    async fn delete(&self, path: &str) -> Result<usize, StoreError> {
        let prefix = ObjectPath::from(path);
        let locations: Vec<ObjectPath> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .map_err(|source| StoreError::from_object_store(path, source))?;

        if locations.is_empty() {
            return Err(StoreError::NotFound {
                path: path.to_string(),
            });
        }

        let mut deleted = 0;
        for location in locations {
            match self.store.delete(&location).await {
                Ok(()) => deleted += 1,
                // Removed concurrently, the outcome is the same
                Err(object_store::Error::NotFound { .. }) => {}
                Err(source) => {
                    return Err(StoreError::Backend {
                        path: location.to_string(),
                        source,
                    });
                }
            }
        }

        tracing::trace!(path = %path, deleted, "Deleted object tree");

        Ok(deleted)
    }
}

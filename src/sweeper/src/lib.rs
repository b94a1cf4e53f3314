//! Registry garbage collection.
//!
//! Reconciles the repository metadata a container registry keeps in object
//! storage against the images a cluster still knows about, and removes what
//! nothing references anymore.
//!
//! ## Architecture
//!
//! - `scanner`: paginated listing of `<root>/repositories` into [`Repository`] entities
//! - `image_index`: digest → image reference lookup built from the cluster
//! - `reconciler`: pure orphan classification policies
//! - `executor`: per-component repository metadata deletion
//! - `blobs`: mark-and-sweep over `<root>/blobs`
//! - `sweep`: run orchestration with a bounded worker pool and cancellation
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use common::config::SweepConfig;
//! use sweeper::{ObjectStoreBackend, RegistryLayout, Sweeper};
//!
//! # async fn example() -> Result<(), sweeper::SweepError> {
//! let store = Arc::new(object_store::memory::InMemory::new());
//! let backend = Arc::new(ObjectStoreBackend::new(store, 1000));
//! let sweeper = Sweeper::new(
//!     RegistryLayout::new("docker/registry/v2"),
//!     SweepConfig::default(),
//!     backend.clone(),
//!     backend,
//! );
//!
//! let summary = sweeper.sweep_uploads().await?;
//! summary.log();
//! # Ok(())
//! # }
//! ```

pub mod blobs;
pub mod cancel;
pub mod error;
pub mod executor;
pub mod image_index;
pub mod layout;
pub mod openshift;
pub mod pool;
pub mod reconciler;
pub mod repository;
pub mod scanner;
pub mod store;
pub mod summary;
pub mod sweep;

// Re-export commonly used types
pub use cancel::{CancelTrigger, Cancellation, cancellation};
pub use error::SweepError;
pub use executor::{
    ComponentOutcome, DeletionError, DeletionExecutor, DeletionOutcome, RepositoryDeletion,
};
pub use image_index::{ClusterError, ClusterImageLister, ImageIndex, ImageRecord};
pub use layout::{Component, Digest, RegistryLayout};
pub use openshift::OpenShiftImageLister;
pub use reconciler::{Classification, LiveReason, OrphanPolicy, OrphanReason};
pub use repository::{Repository, RepositoryMap};
pub use scanner::{NamespaceScanner, ParseFailure, ScanReport};
pub use store::{ListPage, ListedObject, ObjectLister, ObjectRemover, ObjectStoreBackend, StoreError};
pub use summary::{FailedDeletion, Stage, SweepSummary};
pub use sweep::Sweeper;

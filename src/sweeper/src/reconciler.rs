//! Orphan classification. Pure functions over already-built entities.

use crate::image_index::ImageIndex;
use crate::layout::Digest;
use crate::repository::Repository;
use serde::Serialize;
use std::fmt;

/// Which repositories count as orphans.
#[derive(Debug, Clone, Copy)]
pub enum OrphanPolicy<'a> {
    /// Only upload sessions remain: no layers and no manifest revisions.
    Uploads,
    /// No manifest revision is known to the cluster.
    Cluster(&'a ImageIndex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// Nothing but upload sessions.
    UploadsOnly,
    /// No manifest revisions at all, so nothing can be referenced.
    NoManifestRevisions,
    /// Manifest revisions exist but the cluster knows none of them.
    NoReferencedRevision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveReason {
    /// Has layers or manifest revisions.
    HasContent,
    /// At least one manifest revision is referenced by the cluster.
    Referenced { digest: Digest, reference: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Deletable(OrphanReason),
    Live(LiveReason),
}

impl Classification {
    pub fn is_deletable(&self) -> bool {
        matches!(self, Classification::Deletable(_))
    }
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrphanReason::UploadsOnly => "only upload sessions remain",
            OrphanReason::NoManifestRevisions => "no manifest revisions",
            OrphanReason::NoReferencedRevision => "no manifest revision is referenced by the cluster",
        })
    }
}

impl fmt::Display for LiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveReason::HasContent => f.write_str("has layers or manifest revisions"),
            LiveReason::Referenced { digest, reference } => {
                write!(f, "{digest} is referenced by '{reference}'")
            }
        }
    }
}

impl OrphanPolicy<'_> {
    pub fn classify(&self, repository: &Repository) -> Classification {
        match self {
            OrphanPolicy::Uploads => {
                if repository.has_layers() || repository.has_manifests() {
                    Classification::Live(LiveReason::HasContent)
                } else {
                    Classification::Deletable(OrphanReason::UploadsOnly)
                }
            }
            OrphanPolicy::Cluster(index) => {
                // No revisions means nothing to match: vacuously deletable,
                // including repositories holding only uploads or layers.
                if !repository.has_manifests() {
                    return Classification::Deletable(OrphanReason::NoManifestRevisions);
                }

                repository
                    .manifest_revisions
                    .iter()
                    .find_map(|digest| {
                        index.reference(&digest.to_string()).map(|reference| {
                            Classification::Live(LiveReason::Referenced {
                                digest: digest.clone(),
                                reference: reference.to_string(),
                            })
                        })
                    })
                    .unwrap_or(Classification::Deletable(OrphanReason::NoReferencedRevision))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrphanPolicy::Uploads => "uploads",
            OrphanPolicy::Cluster(_) => "cluster",
        }
    }
}

use crate::layout::Digest;
use std::collections::{BTreeMap, BTreeSet};

/// Repositories keyed by `namespace/name`.
pub type RepositoryMap = BTreeMap<String, Repository>;

/// The metadata footprint of one image repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repository {
    /// `namespace/name`
    pub name: String,
    pub manifest_revisions: BTreeSet<Digest>,
    pub layers: BTreeSet<Digest>,
    /// Upload session paths, opaque.
    pub uploads: BTreeSet<String>,
}

impl Repository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn has_manifests(&self) -> bool {
        !self.manifest_revisions.is_empty()
    }

    pub fn has_layers(&self) -> bool {
        !self.layers.is_empty()
    }

    /// Every blob digest this repository links to: layers and manifest revisions.
    pub fn referenced_digests(&self) -> impl Iterator<Item = &Digest> {
        self.layers.iter().chain(self.manifest_revisions.iter())
    }
}

//! Registry storage layout.
//!
//! ```text
//! <root>/repositories/<namespace>/<name>/_layers/<algorithm>/<hex>/link
//! <root>/repositories/<namespace>/<name>/_manifests/revisions/<algorithm>/<hex>/link
//! <root>/repositories/<namespace>/<name>/_uploads/<session-path>
//! <root>/blobs/<algorithm>/<hex[0..2]>/<hex>/data
//! ```

use serde::Serialize;
use std::fmt;

/// The only digest algorithm the registry stores content under.
pub const SUPPORTED_ALGORITHM: &str = "sha256";

/// Content digest in its canonical `algorithm:hex` form.
///
/// Layer links and manifest revisions are both recorded as `Digest`, so they
/// compare directly with each other and with the digests the cluster reports.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Build a digest from an algorithm and hex path segment pair.
    pub fn from_parts(algorithm: &str, hex: &str) -> Result<Self, String> {
        if algorithm != SUPPORTED_ALGORITHM {
            return Err(format!("unsupported digest algorithm '{algorithm}'"));
        }
        if hex.is_empty() {
            return Err("empty digest".to_string());
        }
        Ok(Self {
            hex: hex.to_string(),
        })
    }

    pub fn sha256(hex: impl Into<String>) -> Self {
        Self { hex: hex.into() }
    }

    pub fn algorithm(&self) -> &'static str {
        SUPPORTED_ALGORITHM
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm(), self.hex)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

/// Metadata component of a repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum Component {
    Manifests,
    Layers,
    Uploads,
}

impl Component {
    /// Order in which a repository's components are removed.
    pub const DELETION_ORDER: [Component; 3] =
        [Component::Manifests, Component::Layers, Component::Uploads];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Manifests => "_manifests",
            Component::Layers => "_layers",
            Component::Uploads => "_uploads",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "_manifests" => Some(Component::Manifests),
            "_layers" => Some(Component::Layers),
            "_uploads" => Some(Component::Uploads),
            _ => None,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Component> for String {
    fn from(component: Component) -> Self {
        component.as_str().to_string()
    }
}

/// Key prefixes of one registry inside a bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryLayout {
    root: String,
}

impl RegistryLayout {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            root: root.trim_matches('/').to_string(),
        }
    }

    pub fn repositories_prefix(&self) -> String {
        format!("{}/repositories", self.root)
    }

    pub fn blobs_prefix(&self) -> String {
        format!("{}/blobs", self.root)
    }

    pub fn repository_component(&self, repository: &str, component: Component) -> String {
        format!("{}/repositories/{repository}/{component}", self.root)
    }

    /// Directory holding a blob's `data` object.
    pub fn blob_dir(&self, digest: &Digest) -> String {
        let hex = digest.hex();
        let shard = hex.get(..2).unwrap_or(hex);
        format!("{}/blobs/{}/{shard}/{hex}", self.root, digest.algorithm())
    }

    /// Key relative to `<root>/repositories/`, if it lies below it.
    pub fn strip_repositories_prefix<'k>(&self, key: &'k str) -> Option<&'k str> {
        strip_dir_prefix(key, &self.repositories_prefix())
    }

    /// Key relative to `<root>/blobs/`, if it lies below it.
    pub fn strip_blobs_prefix<'k>(&self, key: &'k str) -> Option<&'k str> {
        strip_dir_prefix(key, &self.blobs_prefix())
    }
}

fn strip_dir_prefix<'k>(key: &'k str, prefix: &str) -> Option<&'k str> {
    key.strip_prefix(prefix)?
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty())
}

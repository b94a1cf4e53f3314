//! Mark-and-sweep over `<root>/blobs`.
//!
//! The mark phase is the set of digests linked from surviving repositories,
//! both layers and manifest revisions. A blob directory is swept only when it
//! is unmarked and its newest object is older than the grace period.

use crate::cancel::Cancellation;
use crate::error::SweepError;
use crate::layout::{Digest, RegistryLayout};
use crate::repository::RepositoryMap;
use crate::store::ObjectLister;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// One blob directory, aggregated over every object below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub digest: Digest,
    pub objects: usize,
    pub size: u64,
    /// Newest modification time of any object in the directory.
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct BlobScan {
    pub blobs: BTreeMap<Digest, BlobEntry>,
    /// Keys that do not follow the blob layout. They are never deleted.
    pub unrecognized: Vec<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobDecision {
    Referenced,
    WithinGracePeriod,
    Unreferenced,
}

/// Parse a key relative to `<root>/blobs/` into the digest of its directory.
pub fn parse_blob_key(relative: &str) -> Result<Digest, String> {
    let segments: Vec<&str> = relative.split('/').collect();
    let [algorithm, shard, hex, _, ..] = segments.as_slice() else {
        return Err("expected <algorithm>/<shard>/<hex>/<object>".to_string());
    };

    let digest = Digest::from_parts(algorithm, hex)?;
    if shard.len() != 2 || !hex.starts_with(*shard) {
        return Err(format!("shard '{shard}' does not match digest {digest}"));
    }

    Ok(digest)
}

/// Every digest still linked from a repository.
pub fn live_set(repositories: &RepositoryMap) -> BTreeSet<Digest> {
    repositories
        .values()
        .flat_map(|repo| repo.referenced_digests().cloned())
        .collect()
}

/// Blobs modified after the returned instant are within the grace period.
/// `None` when the period reaches past the representable range, in which
/// case every blob is within it.
pub fn grace_cutoff(now: DateTime<Utc>, grace: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(grace)
        .ok()
        .and_then(|grace| now.checked_sub_signed(grace))
}

pub fn classify_blob(
    blob: &BlobEntry,
    live: &BTreeSet<Digest>,
    cutoff: Option<DateTime<Utc>>,
) -> BlobDecision {
    if live.contains(&blob.digest) {
        return BlobDecision::Referenced;
    }
    match cutoff {
        Some(cutoff) if blob.last_modified < cutoff => BlobDecision::Unreferenced,
        _ => BlobDecision::WithinGracePeriod,
    }
}

/// Blobs to delete, in digest order.
pub fn sweep_candidates(
    scan: &BlobScan,
    live: &BTreeSet<Digest>,
    now: DateTime<Utc>,
    grace: Duration,
) -> Vec<BlobEntry> {
    let cutoff = grace_cutoff(now, grace);
    scan.blobs
        .values()
        .filter(|blob| {
            let decision = classify_blob(blob, live, cutoff);
            tracing::trace!(digest = %blob.digest, decision = ?decision, "Classified blob");
            decision == BlobDecision::Unreferenced
        })
        .cloned()
        .collect()
}

/// List every page below `<root>/blobs` and group objects by blob directory.
pub async fn scan_blobs(
    layout: &RegistryLayout,
    lister: &dyn ObjectLister,
    cancellation: &Cancellation,
) -> Result<BlobScan, SweepError> {
    let prefix = layout.blobs_prefix();
    let mut scan = BlobScan::default();
    let mut marker: Option<String> = None;

    loop {
        if cancellation.is_cancelled() {
            scan.cancelled = true;
            return Ok(scan);
        }

        let page = lister
            .list_page(&prefix, marker.as_deref())
            .await
            .map_err(|source| SweepError::Listing {
                prefix: prefix.clone(),
                source,
            })?;

        for object in page.objects {
            let parsed = layout
                .strip_blobs_prefix(&object.key)
                .ok_or_else(|| "outside the blobs prefix".to_string())
                .and_then(parse_blob_key);

            let digest = match parsed {
                Ok(digest) => digest,
                Err(reason) => {
                    tracing::warn!(key = %object.key, reason = %reason, "Ignoring unrecognized blob key");
                    scan.unrecognized.push(object.key);
                    continue;
                }
            };

            let entry = scan.blobs.entry(digest.clone()).or_insert_with(|| BlobEntry {
                digest,
                objects: 0,
                size: 0,
                last_modified: object.last_modified,
            });
            entry.objects += 1;
            entry.size += object.size;
            entry.last_modified = entry.last_modified.max(object.last_modified);
        }

        match page.next_marker {
            Some(next) => marker = Some(next),
            None => break,
        }
    }

    tracing::info!(
        blobs = scan.blobs.len(),
        unrecognized = scan.unrecognized.len(),
        "Blob scan complete"
    );

    Ok(scan)
}

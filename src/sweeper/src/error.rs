use crate::executor::DeletionError;
use crate::image_index::ClusterError;
use crate::layout::Digest;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("malformed registry key '{key}': {reason}")]
    MalformedKey { key: String, reason: String },
    #[error("listing '{prefix}' failed")]
    Listing {
        prefix: String,
        #[source]
        source: StoreError,
    },
    #[error("cluster image query failed")]
    ClusterQuery(#[from] ClusterError),
    #[error(transparent)]
    Deletion(#[from] DeletionError),
    #[error("deleting blob {digest} failed")]
    BlobDeletion {
        digest: Digest,
        #[source]
        source: StoreError,
    },
    #[error(
        "blob sweep refused: {failures} repository key(s) could not be parsed, the live reference set would be incomplete"
    )]
    IncompleteReferenceSet { failures: usize },
}

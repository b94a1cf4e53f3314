//! Run orchestration: scan, classify, delete, report.

use crate::blobs::{self, BlobEntry};
use crate::cancel::Cancellation;
use crate::error::SweepError;
use crate::executor::{DeletionError, DeletionExecutor};
use crate::image_index::{ClusterImageLister, ImageIndex};
use crate::layout::RegistryLayout;
use crate::pool::{TaskResult, WorkerPool};
use crate::reconciler::{Classification, OrphanPolicy};
use crate::scanner::{NamespaceScanner, ScanReport};
use crate::store::{ObjectLister, ObjectRemover};
use crate::summary::{Stage, SweepSummary};
use chrono::Utc;
use common::config::{FailurePolicy, SweepConfig};
use std::sync::Arc;

/// Drives the sweep stages against one registry.
#[derive(Clone)]
pub struct Sweeper {
    layout: RegistryLayout,
    config: SweepConfig,
    lister: Arc<dyn ObjectLister>,
    remover: Arc<dyn ObjectRemover>,
    executor: DeletionExecutor,
    cancellation: Cancellation,
}

impl Sweeper {
    pub fn new(
        layout: RegistryLayout,
        config: SweepConfig,
        lister: Arc<dyn ObjectLister>,
        remover: Arc<dyn ObjectRemover>,
    ) -> Self {
        Self {
            executor: DeletionExecutor::new(layout.clone(), remover.clone()),
            layout,
            config,
            lister,
            remover,
            cancellation: Cancellation::never(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Delete repositories that hold nothing but upload sessions.
    pub async fn sweep_uploads(&self) -> Result<SweepSummary, SweepError> {
        tracing::info!(dry_run = self.config.dry_run, "Starting upload sweep");
        let report = self.scan().await?;
        self.sweep_repositories(Stage::Uploads, OrphanPolicy::Uploads, report)
            .await
    }

    /// Delete repositories none of whose manifest revisions the cluster
    /// still knows.
    ///
    /// The image index is built first; if the cluster cannot be queried
    /// nothing is classified.
    pub async fn sweep_repos(&self, cluster: &dyn ClusterImageLister) -> Result<SweepSummary, SweepError> {
        tracing::info!(dry_run = self.config.dry_run, "Starting repository sweep");
        let index = ImageIndex::build(cluster).await?;
        let report = self.scan().await?;
        self.sweep_repositories(Stage::Repos, OrphanPolicy::Cluster(&index), report)
            .await
    }

    /// Delete blobs no surviving repository links to.
    pub async fn sweep_blobs(&self) -> Result<SweepSummary, SweepError> {
        tracing::info!(
            dry_run = self.config.dry_run,
            grace_period = ?self.config.blob_grace_period,
            "Starting blob sweep"
        );

        let mut summary = SweepSummary::new(Stage::Blobs, self.config.dry_run);

        let report = self.scan().await?;
        summary.repositories_scanned = report.repositories.len();
        if report.cancelled {
            return Ok(finish_cancelled(summary));
        }
        if !report.failures.is_empty() {
            return Err(SweepError::IncompleteReferenceSet {
                failures: report.failures.len(),
            });
        }

        let live = blobs::live_set(&report.repositories);
        let scan = blobs::scan_blobs(&self.layout, self.lister.as_ref(), &self.cancellation).await?;
        summary.blobs_scanned = scan.blobs.len();
        if scan.cancelled {
            return Ok(finish_cancelled(summary));
        }

        let candidates = blobs::sweep_candidates(&scan, &live, Utc::now(), self.config.blob_grace_period);
        summary.deletable = candidates.len();

        tracing::info!(
            blobs = scan.blobs.len(),
            live = live.len(),
            unreferenced = candidates.len(),
            "Classified blobs"
        );

        if self.config.dry_run {
            for blob in &candidates {
                tracing::info!(
                    digest = %blob.digest,
                    size = blob.size,
                    "[DRY-RUN] Would delete blob"
                );
                summary.deleted.push(blob.digest.to_string());
                summary.bytes_freed += blob.size;
            }
            summary.log();
            return Ok(summary);
        }

        let layout = &self.layout;
        let remover = &self.remover;
        let results = self
            .pool()
            .run(candidates, move |blob: BlobEntry| async move {
                match remover.delete(&layout.blob_dir(&blob.digest)).await {
                    Ok(objects) => Ok(Some(objects)),
                    Err(err) if err.is_not_found() => Ok(None),
                    Err(err) => Err(err),
                }
            })
            .await;

        let mut first_error: Option<SweepError> = None;
        let mut not_started = 0;
        for (blob, result) in results {
            match result {
                TaskResult::Done(Some(objects)) => {
                    tracing::info!(digest = %blob.digest, objects, size = blob.size, "Deleted blob");
                    summary.deleted.push(blob.digest.to_string());
                    summary.bytes_freed += blob.size;
                }
                TaskResult::Done(None) => summary.already_absent += 1,
                TaskResult::Failed(source) => {
                    tracing::error!(digest = %blob.digest, error = %source, "Failed to delete blob");
                    summary.record_failure(blob.digest.to_string(), source.to_string());
                    first_error.get_or_insert(SweepError::BlobDeletion {
                        digest: blob.digest,
                        source,
                    });
                }
                TaskResult::NotStarted => not_started += 1,
            }
        }
        summary.deleted.sort();

        self.finish(summary, first_error, not_started)
    }

    /// Uploads, then repositories, then blobs. Stops after the first stage
    /// that does not complete successfully.
    pub async fn sweep_all(&self, cluster: &dyn ClusterImageLister) -> Result<Vec<SweepSummary>, SweepError> {
        let mut summaries = Vec::with_capacity(3);

        let uploads = self.sweep_uploads().await?;
        let proceed = uploads.is_success();
        summaries.push(uploads);
        if !proceed {
            return Ok(summaries);
        }

        let repos = self.sweep_repos(cluster).await?;
        let proceed = repos.is_success();
        summaries.push(repos);
        if !proceed {
            return Ok(summaries);
        }

        summaries.push(self.sweep_blobs().await?);
        Ok(summaries)
    }

    async fn scan(&self) -> Result<ScanReport, SweepError> {
        NamespaceScanner::new(self.layout.clone(), self.config.malformed_keys)
            .scan(self.lister.as_ref(), &self.cancellation)
            .await
    }

    fn pool(&self) -> WorkerPool {
        WorkerPool::new(
            self.config.concurrency,
            self.config.failure_policy,
            self.cancellation.clone(),
        )
    }

    async fn sweep_repositories(
        &self,
        stage: Stage,
        policy: OrphanPolicy<'_>,
        report: ScanReport,
    ) -> Result<SweepSummary, SweepError> {
        let mut summary = SweepSummary::new(stage, self.config.dry_run);
        summary.repositories_scanned = report.repositories.len();
        summary.parse_failures = report.failures.clone();

        let tainted = report.tainted();
        summary.tainted = tainted.iter().cloned().collect();

        if report.cancelled {
            return Ok(finish_cancelled(summary));
        }

        let mut deletable = Vec::new();
        for repository in report.repositories.values() {
            if tainted.contains(&repository.name) {
                tracing::warn!(
                    repository = %repository.name,
                    "Skipping repository with unparseable keys"
                );
                continue;
            }

            match policy.classify(repository) {
                Classification::Deletable(reason) => {
                    tracing::info!(
                        repository = %repository.name,
                        policy = policy.name(),
                        reason = %reason,
                        "Repository is orphaned"
                    );
                    deletable.push(repository.name.clone());
                }
                Classification::Live(reason) => {
                    tracing::debug!(
                        repository = %repository.name,
                        policy = policy.name(),
                        reason = %reason,
                        "Keeping repository"
                    );
                }
            }
        }
        summary.deletable = deletable.len();

        if self.config.dry_run {
            for name in &deletable {
                tracing::info!(repository = %name, "[DRY-RUN] Would delete repository");
            }
            summary.deleted = deletable;
            summary.log();
            return Ok(summary);
        }

        let executor = &self.executor;
        let results = self
            .pool()
            .run(deletable, move |name: String| async move {
                executor.delete_repository(&name).await
            })
            .await;

        let mut first_error: Option<SweepError> = None;
        let mut not_started = 0;
        for (name, result) in results {
            match result {
                TaskResult::Done(deletion) if deletion.is_already_absent() => {
                    tracing::info!(repository = %name, "Repository already absent");
                    summary.already_absent += 1;
                }
                TaskResult::Done(deletion) => {
                    tracing::info!(
                        repository = %name,
                        objects = deletion.objects_deleted(),
                        "Deleted repository"
                    );
                    summary.deleted.push(name);
                }
                TaskResult::Failed(err) => {
                    summary.record_failure(name, failure_cause(&err));
                    first_error.get_or_insert(SweepError::Deletion(err));
                }
                TaskResult::NotStarted => not_started += 1,
            }
        }
        summary.deleted.sort();

        self.finish(summary, first_error, not_started)
    }

    /// Flag cancellation, log, and under fail-fast turn the first failure
    /// into the stage's error.
    ///
    /// The stage only counts as cancelled when cancellation left work
    /// unstarted; a signal arriving after the last deletion changes nothing.
    fn finish(
        &self,
        mut summary: SweepSummary,
        first_error: Option<SweepError>,
        not_started: usize,
    ) -> Result<SweepSummary, SweepError> {
        summary.cancelled = not_started > 0 && self.cancellation.is_cancelled();
        summary.log();

        match first_error {
            Some(err) if self.config.failure_policy == FailurePolicy::FailFast => Err(err),
            _ => Ok(summary),
        }
    }
}

fn finish_cancelled(mut summary: SweepSummary) -> SweepSummary {
    summary.cancelled = true;
    summary.log();
    summary
}

fn failure_cause(err: &DeletionError) -> String {
    format!("{}: {}", err, err.source)
}

//! Removes a repository's metadata, one component at a time.
//!
//! Nothing is rolled back: a failure leaves the components already removed
//! gone, and running the deletion again finishes the job.

use crate::layout::{Component, RegistryLayout};
use crate::store::{ObjectRemover, StoreError};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionOutcome {
    Deleted { objects: usize },
    AlreadyAbsent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentOutcome {
    pub component: Component,
    pub outcome: DeletionOutcome,
}

/// A repository whose components were all removed or already absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDeletion {
    pub repository: String,
    pub components: Vec<ComponentOutcome>,
}

impl RepositoryDeletion {
    /// Nothing was left to delete.
    pub fn is_already_absent(&self) -> bool {
        self.components
            .iter()
            .all(|c| c.outcome == DeletionOutcome::AlreadyAbsent)
    }

    pub fn objects_deleted(&self) -> usize {
        self.components
            .iter()
            .map(|c| match c.outcome {
                DeletionOutcome::Deleted { objects } => objects,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("deleting {component} of repository '{repository}' failed")]
pub struct DeletionError {
    pub repository: String,
    pub component: Component,
    /// Outcomes of the components handled before the failing one.
    pub completed: Vec<ComponentOutcome>,
    #[source]
    pub source: StoreError,
}

impl DeletionError {
    /// Completed outcomes followed by the failed component.
    pub fn outcomes(&self) -> Vec<ComponentOutcome> {
        let mut outcomes = self.completed.clone();
        outcomes.push(ComponentOutcome {
            component: self.component,
            outcome: DeletionOutcome::Failed(self.source.to_string()),
        });
        outcomes
    }
}

#[derive(Clone)]
pub struct DeletionExecutor {
    layout: RegistryLayout,
    remover: Arc<dyn ObjectRemover>,
}

impl DeletionExecutor {
    pub fn new(layout: RegistryLayout, remover: Arc<dyn ObjectRemover>) -> Self {
        Self { layout, remover }
    }

    /// Delete `_manifests`, `_layers` and `_uploads` of `repository` in that
    /// order. Blobs are never touched.
    pub async fn delete_repository(&self, repository: &str) -> Result<RepositoryDeletion, DeletionError> {
        let mut components = Vec::with_capacity(Component::DELETION_ORDER.len());

        for component in Component::DELETION_ORDER {
            let path = self.layout.repository_component(repository, component);

            let outcome = match self.remover.delete(&path).await {
                Ok(objects) => DeletionOutcome::Deleted { objects },
                Err(err) if err.is_not_found() => DeletionOutcome::AlreadyAbsent,
                Err(source) => {
                    tracing::error!(
                        repository = %repository,
                        component = %component,
                        error = %source,
                        "Failed to delete repository component"
                    );
                    return Err(DeletionError {
                        repository: repository.to_string(),
                        component,
                        completed: components,
                        source,
                    });
                }
            };

            tracing::debug!(
                repository = %repository,
                component = %component,
                outcome = ?outcome,
                "Deleted repository component"
            );

            components.push(ComponentOutcome { component, outcome });
        }

        Ok(RepositoryDeletion {
            repository: repository.to_string(),
            components,
        })
    }
}

//! Turns the flat key space below `<root>/repositories` into [`Repository`]
//! entities.

use crate::cancel::Cancellation;
use crate::error::SweepError;
use crate::layout::{Component, Digest, RegistryLayout};
use crate::repository::{Repository, RepositoryMap};
use crate::store::{ListedObject, ObjectLister};
use common::config::MalformedKeyPolicy;
use serde::Serialize;
use std::collections::BTreeSet;

/// A listed key that does not match the registry layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    pub key: String,
    pub reason: String,
    /// Repository the key belongs to, when at least that much could be read.
    pub repository: Option<String>,
}

/// Outcome of a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub repositories: RepositoryMap,
    /// Keys skipped under [`MalformedKeyPolicy::Skip`], in listing order.
    pub failures: Vec<ParseFailure>,
    pub objects_listed: usize,
    pub pages: usize,
    /// The scan stopped early; `repositories` is incomplete.
    pub cancelled: bool,
}

impl ScanReport {
    /// Repositories that own at least one unparseable key.
    pub fn tainted(&self) -> BTreeSet<String> {
        self.failures
            .iter()
            .filter_map(|failure| failure.repository.clone())
            .collect()
    }
}

/// What a single repository key contributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryEntry {
    Layer(Digest),
    ManifestRevision(Digest),
    Upload(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryKey {
    pub repository: String,
    pub entry: RepositoryEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyError {
    pub reason: String,
    pub repository: Option<String>,
}

/// Parse a key relative to `<root>/repositories/`.
pub fn parse_repository_key(relative: &str) -> Result<RepositoryKey, KeyError> {
    let segments: Vec<&str> = relative.split('/').collect();

    let repository = match segments.as_slice() {
        [namespace, name, ..] if !namespace.is_empty() && !name.is_empty() => {
            format!("{namespace}/{name}")
        }
        _ => {
            return Err(KeyError {
                reason: "expected <namespace>/<name>/<component>".to_string(),
                repository: None,
            });
        }
    };

    let fail = |reason: String| KeyError {
        reason,
        repository: Some(repository.clone()),
    };

    let Some(component) = segments.get(2) else {
        return Err(fail("missing component".to_string()));
    };

    let entry = match Component::from_segment(component) {
        Some(Component::Layers) => match segments.get(3..5) {
            Some([algorithm, hex]) => RepositoryEntry::Layer(Digest::from_parts(algorithm, hex).map_err(fail)?),
            _ => return Err(fail("truncated layer key".to_string())),
        },
        Some(Component::Manifests) => match segments.get(3) {
            Some(&"revisions") => match segments.get(4..6) {
                Some([algorithm, hex]) => {
                    RepositoryEntry::ManifestRevision(Digest::from_parts(algorithm, hex).map_err(fail)?)
                }
                _ => return Err(fail("truncated manifest revision key".to_string())),
            },
            Some(kind) => return Err(fail(format!("unknown manifest type '{kind}'"))),
            None => return Err(fail("truncated manifest key".to_string())),
        },
        Some(Component::Uploads) => {
            let session = segments[3..].join("/");
            if session.is_empty() {
                return Err(fail("empty upload session".to_string()));
            }
            RepositoryEntry::Upload(session)
        }
        None => return Err(fail(format!("unknown component '{component}'"))),
    };

    Ok(RepositoryKey { repository, entry })
}

/// Scans the repositories key space.
#[derive(Debug, Clone)]
pub struct NamespaceScanner {
    layout: RegistryLayout,
    policy: MalformedKeyPolicy,
}

impl NamespaceScanner {
    pub fn new(layout: RegistryLayout, policy: MalformedKeyPolicy) -> Self {
        Self { layout, policy }
    }

    /// List every page below `<root>/repositories` and fold the keys into
    /// repositories.
    ///
    /// # Errors
    ///
    /// - [`SweepError::Listing`] if a page cannot be fetched
    /// - [`SweepError::MalformedKey`] on the first bad key under
    ///   [`MalformedKeyPolicy::Abort`]
    pub async fn scan(
        &self,
        lister: &dyn ObjectLister,
        cancellation: &Cancellation,
    ) -> Result<ScanReport, SweepError> {
        let prefix = self.layout.repositories_prefix();
        let mut report = ScanReport::default();
        let mut marker: Option<String> = None;

        tracing::info!(prefix = %prefix, policy = ?self.policy, "Scanning repositories");

        loop {
            if cancellation.is_cancelled() {
                tracing::warn!(pages = report.pages, "Repository scan cancelled");
                report.cancelled = true;
                return Ok(report);
            }

            let page = lister
                .list_page(&prefix, marker.as_deref())
                .await
                .map_err(|source| SweepError::Listing {
                    prefix: prefix.clone(),
                    source,
                })?;

            report.pages += 1;
            report.objects_listed += page.objects.len();

            for object in &page.objects {
                self.ingest(object, &mut report)?;
            }

            tracing::debug!(
                page = report.pages,
                objects = report.objects_listed,
                repositories = report.repositories.len(),
                "Scanned page"
            );

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        tracing::info!(
            objects = report.objects_listed,
            pages = report.pages,
            repositories = report.repositories.len(),
            malformed = report.failures.len(),
            "Repository scan complete"
        );

        Ok(report)
    }

    fn ingest(&self, object: &ListedObject, report: &mut ScanReport) -> Result<(), SweepError> {
        let parsed = match self.layout.strip_repositories_prefix(&object.key) {
            Some(relative) => parse_repository_key(relative),
            None => Err(KeyError {
                reason: "outside the repositories prefix".to_string(),
                repository: None,
            }),
        };

        let key = match parsed {
            Ok(key) => key,
            Err(err) => {
                return match self.policy {
                    MalformedKeyPolicy::Abort => Err(SweepError::MalformedKey {
                        key: object.key.clone(),
                        reason: err.reason,
                    }),
                    MalformedKeyPolicy::Skip => {
                        tracing::warn!(
                            key = %object.key,
                            reason = %err.reason,
                            repository = ?err.repository,
                            "Skipping malformed key"
                        );
                        report.failures.push(ParseFailure {
                            key: object.key.clone(),
                            reason: err.reason,
                            repository: err.repository,
                        });
                        Ok(())
                    }
                };
            }
        };

        let repository = report
            .repositories
            .entry(key.repository)
            .or_insert_with_key(|name| Repository::new(name.clone()));

        match key.entry {
            RepositoryEntry::Layer(digest) => {
                repository.layers.insert(digest);
            }
            RepositoryEntry::ManifestRevision(digest) => {
                repository.manifest_revisions.insert(digest);
            }
            RepositoryEntry::Upload(session) => {
                repository.uploads.insert(session);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ListPage, StoreError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    const ROOT: &str = "docker/registry/v2";

    /// Serves pre-built pages and records the markers it was asked for.
    struct PagedLister {
        pages: Vec<Vec<&'static str>>,
        markers: Mutex<Vec<Option<String>>>,
    }

    impl PagedLister {
        fn new(pages: Vec<Vec<&'static str>>) -> Self {
            Self {
                pages,
                markers: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ObjectLister for PagedLister {
        async fn list_page(&self, _prefix: &str, marker: Option<&str>) -> Result<ListPage, StoreError> {
            let mut markers = self.markers.lock().unwrap();
            markers.push(marker.map(str::to_string));
            let index = markers.len() - 1;

            let objects = self.pages[index]
                .iter()
                .map(|key| ListedObject {
                    key: format!("{ROOT}/repositories/{key}"),
                    size: 1,
                    last_modified: Utc::now(),
                })
                .collect();
            let next_marker = (index + 1 < self.pages.len()).then(|| format!("page-{index}"));

            Ok(ListPage { objects, next_marker })
        }
    }

    fn scanner(policy: MalformedKeyPolicy) -> NamespaceScanner {
        NamespaceScanner::new(RegistryLayout::new(ROOT), policy)
    }

    #[test]
    fn test_parse_layer_and_manifest_keys() {
        let key = parse_repository_key("ns/app/_layers/sha256/abc/link").unwrap();
        assert_eq!(key.repository, "ns/app");
        assert_eq!(key.entry, RepositoryEntry::Layer(Digest::sha256("abc")));

        let key = parse_repository_key("ns/app/_manifests/revisions/sha256/def/link").unwrap();
        assert_eq!(key.entry, RepositoryEntry::ManifestRevision(Digest::sha256("def")));
    }

    #[test]
    fn test_parse_upload_keeps_full_session_path() {
        let key = parse_repository_key("ns/app/_uploads/7f3a/hashstates/sha256/0").unwrap();
        assert_eq!(key.entry, RepositoryEntry::Upload("7f3a/hashstates/sha256/0".to_string()));
    }

    #[test]
    fn test_parse_rejects_grammar_violations() {
        let cases = [
            ("ns/app/_tags/latest", "unknown component"),
            ("ns/app/_layers/sha512/abc", "unsupported digest algorithm"),
            ("ns/app/_layers/sha256", "truncated layer key"),
            ("ns/app/_manifests/tags/latest/current/link", "unknown manifest type"),
            ("ns/app/_manifests/revisions/sha256", "truncated manifest revision key"),
            ("ns/app/_uploads", "empty upload session"),
            ("ns/app", "missing component"),
        ];

        for (key, expected) in cases {
            let err = parse_repository_key(key).unwrap_err();
            assert!(err.reason.contains(expected), "{key}: {}", err.reason);
            assert_eq!(err.repository.as_deref(), Some("ns/app"), "{key}");
        }

        let err = parse_repository_key("lonely").unwrap_err();
        assert_eq!(err.repository, None);
    }

    #[tokio::test]
    async fn test_layers_and_manifests_form_one_repository() {
        let lister = PagedLister::new(vec![vec![
            "ns/app/_layers/sha256/abc",
            "ns/app/_manifests/revisions/sha256/def",
        ]]);

        let report = scanner(MalformedKeyPolicy::Abort)
            .scan(&lister, &Cancellation::never())
            .await
            .unwrap();

        assert_eq!(report.repositories.len(), 1);
        let repo = &report.repositories["ns/app"];
        assert_eq!(repo.name, "ns/app");
        assert_eq!(repo.layers, BTreeSet::from([Digest::sha256("abc")]));
        assert_eq!(repo.manifest_revisions, BTreeSet::from([Digest::sha256("def")]));
        assert!(repo.uploads.is_empty());
    }

    #[tokio::test]
    async fn test_pages_merge_into_same_result() {
        let keys = vec![
            "ns/app/_layers/sha256/abc/link",
            "ns/app/_manifests/revisions/sha256/def/link",
            "ns/other/_uploads/session-1/data",
            "team/web/_layers/sha256/123/link",
        ];
        let single = PagedLister::new(vec![keys.clone()]);
        let split = PagedLister::new(vec![keys[..1].to_vec(), keys[1..3].to_vec(), keys[3..].to_vec()]);

        let scanner = scanner(MalformedKeyPolicy::Abort);
        let from_single = scanner.scan(&single, &Cancellation::never()).await.unwrap();
        let from_split = scanner.scan(&split, &Cancellation::never()).await.unwrap();

        assert_eq!(from_single.repositories, from_split.repositories);
        assert_eq!(from_split.pages, 3);
        assert_eq!(from_split.objects_listed, 4);

        let markers = split.markers.lock().unwrap().clone();
        assert_eq!(
            markers,
            vec![None, Some("page-0".to_string()), Some("page-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unknown_component_aborts_scan() {
        let lister = PagedLister::new(vec![
            vec!["ns/app/_layers/sha256/abc/link", "ns/app/_tags/latest"],
            vec!["ns/later/_uploads/x"],
        ]);

        let err = scanner(MalformedKeyPolicy::Abort)
            .scan(&lister, &Cancellation::never())
            .await
            .unwrap_err();

        match err {
            SweepError::MalformedKey { key, reason } => {
                assert_eq!(key, format!("{ROOT}/repositories/ns/app/_tags/latest"));
                assert!(reason.contains("_tags"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The second page is never requested
        assert_eq!(lister.markers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_policy_records_failures_and_continues() {
        let lister = PagedLister::new(vec![
            vec!["ns/app/_layers/sha256/abc/link", "ns/app/_tags/latest"],
            vec!["ns/broken/_manifests/tags/v1/current/link", "ns/later/_uploads/x"],
        ]);

        let report = scanner(MalformedKeyPolicy::Skip)
            .scan(&lister, &Cancellation::never())
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].key, format!("{ROOT}/repositories/ns/app/_tags/latest"));
        assert_eq!(report.tainted(), BTreeSet::from(["ns/app".to_string(), "ns/broken".to_string()]));

        // A repository seen only through malformed keys is never materialized
        assert!(!report.repositories.contains_key("ns/broken"));
        assert!(report.repositories.contains_key("ns/app"));
        assert!(report.repositories.contains_key("ns/later"));
    }

    #[tokio::test]
    async fn test_cancelled_scan_stops_between_pages() {
        let (trigger, cancellation) = crate::cancel::cancellation();
        trigger.cancel();

        let lister = PagedLister::new(vec![vec!["ns/app/_uploads/x"]]);
        let report = scanner(MalformedKeyPolicy::Abort)
            .scan(&lister, &cancellation)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.pages, 0);
        assert!(report.repositories.is_empty());
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "regsweep.toml";

/// Prefix for environment overrides, e.g. `REGSWEEP__STORAGE__DSN`.
pub const ENV_PREFIX: &str = "REGSWEEP__";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object storage DSN: `s3://[key:secret@]host[:port]/bucket`,
    /// `file:///path` or `memory://`.
    ///
    /// Env: REGSWEEP__STORAGE__DSN
    pub dsn: String,
    /// Registry root inside the bucket, without leading or trailing slash.
    ///
    /// Env: REGSWEEP__STORAGE__ROOT
    pub root: String,
    /// Maximum number of keys requested per listing page.
    ///
    /// Env: REGSWEEP__STORAGE__PAGE_SIZE
    pub page_size: usize,
    /// S3 region.
    ///
    /// Env: REGSWEEP__STORAGE__REGION
    pub region: String,
    /// S3 access key. Takes precedence over credentials embedded in the DSN.
    ///
    /// Env: REGSWEEP__STORAGE__ACCESS_KEY_ID
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// S3 secret key.
    ///
    /// Env: REGSWEEP__STORAGE__SECRET_ACCESS_KEY
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// S3 endpoint URL for non-AWS stores, e.g. `https://minio.local:9000`.
    /// When unset, a non-AWS DSN host is reached over HTTPS.
    ///
    /// Env: REGSWEEP__STORAGE__ENDPOINT
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Permit plaintext HTTP to the S3 endpoint.
    ///
    /// Env: REGSWEEP__STORAGE__ALLOW_HTTP
    #[serde(default)]
    pub allow_http: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            root: "docker/registry/v2".to_string(),
            page_size: 1000,
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
            allow_http: false,
        }
    }
}

impl StorageConfig {
    /// Copy of this configuration that is safe to print.
    pub fn redacted(&self) -> Self {
        let dsn = match url::Url::parse(&self.dsn) {
            Ok(mut url) if url.password().is_some() => {
                let _ = url.set_password(Some("***"));
                url.to_string()
            }
            _ => self.dsn.clone(),
        };

        Self {
            dsn,
            secret_access_key: self.secret_access_key.as_ref().map(|_| "***".to_string()),
            ..self.clone()
        }
    }
}

/// Access to the cluster that records which images are still in use.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Kubeconfig to use. When unset the usual inference applies
    /// (`KUBECONFIG`, `~/.kube/config`, in-cluster service account).
    ///
    /// Env: REGSWEEP__CLUSTER__KUBECONFIG
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    /// Number of image objects requested per API call.
    ///
    /// Env: REGSWEEP__CLUSTER__PAGE_SIZE
    pub page_size: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            page_size: 500,
        }
    }
}

/// What to do with the remaining deletions once one of them failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Start no further deletion after the first failure and return it.
    #[default]
    FailFast,
    /// Keep going and report every failure in the run summary.
    Collect,
}

/// What to do with listed keys that do not match the registry layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MalformedKeyPolicy {
    /// The first malformed key aborts the scan.
    #[default]
    Abort,
    /// Record the key, leave its repository untouched and continue.
    Skip,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Number of repositories (or blobs) deleted concurrently.
    ///
    /// Env: REGSWEEP__SWEEP__CONCURRENCY
    pub concurrency: usize,
    /// Env: REGSWEEP__SWEEP__FAILURE_POLICY
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Env: REGSWEEP__SWEEP__MALFORMED_KEYS
    #[serde(default)]
    pub malformed_keys: MalformedKeyPolicy,
    /// Log what would be deleted without deleting anything.
    ///
    /// Env: REGSWEEP__SWEEP__DRY_RUN
    #[serde(default)]
    pub dry_run: bool,
    /// Unreferenced blobs written more recently than this are kept, so that
    /// pushes in flight are not swept before their layer links appear.
    ///
    /// Env: REGSWEEP__SWEEP__BLOB_GRACE_PERIOD
    #[serde(with = "humantime_serde")]
    pub blob_grace_period: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            failure_policy: FailurePolicy::default(),
            malformed_keys: MalformedKeyPolicy::default(),
            dry_run: false,
            blob_grace_period: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Object storage holding the registry
    pub storage: StorageConfig,
    /// Cluster image API
    pub cluster: ClusterConfig,
    /// Sweep behaviour
    pub sweep: SweepConfig,
}

impl Configuration {
    /// Load defaults, then `regsweep.toml` if present, then `REGSWEEP__*`
    /// environment variables.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    /// Same as [`Configuration::load`] with an explicit configuration file.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject configurations no run could succeed with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.dsn.is_empty() {
            anyhow::bail!("storage.dsn must be set");
        }

        let root = &self.storage.root;
        if root.is_empty() || root.starts_with('/') || root.ends_with('/') {
            anyhow::bail!(
                "storage.root must be a non-empty path without leading or trailing '/', got '{root}'"
            );
        }

        if let Some(endpoint) = &self.storage.endpoint {
            if endpoint.starts_with("http://") && !self.storage.allow_http {
                anyhow::bail!(
                    "storage.endpoint '{endpoint}' uses plaintext HTTP, set storage.allow_http to permit it"
                );
            }
        }

        if self.storage.page_size == 0 {
            anyhow::bail!("storage.page_size must be positive");
        }

        if self.cluster.page_size == 0 {
            anyhow::bail!("cluster.page_size must be positive");
        }

        if self.sweep.concurrency == 0 {
            anyhow::bail!("sweep.concurrency must be positive");
        }

        Ok(())
    }

    /// Copy of this configuration with credentials masked.
    pub fn redacted(&self) -> Self {
        Self {
            storage: self.storage.redacted(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn valid() -> Configuration {
        let mut config = Configuration::default();
        config.storage.dsn = "memory://".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::default();

        assert_eq!(config.storage.root, "docker/registry/v2");
        assert_eq!(config.storage.page_size, 1000);
        assert_eq!(config.cluster.page_size, 500);
        assert!(config.cluster.kubeconfig.is_none());
        assert_eq!(config.sweep.concurrency, 1);
        assert_eq!(config.sweep.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.sweep.malformed_keys, MalformedKeyPolicy::Abort);
        assert!(!config.sweep.dry_run);
        assert_eq!(config.sweep.blob_grace_period, Duration::from_secs(3600));
        assert!(config.storage.endpoint.is_none());
        assert!(!config.storage.allow_http);
    }

    #[test]
    fn test_configless_operation() {
        Jail::expect_with(|_jail| {
            let config = Configuration::load().map_err(|e| *e)?;
            assert!(config.storage.dsn.is_empty());
            assert_eq!(config.storage.root, "docker/registry/v2");
            Ok(())
        });
    }

    #[test]
    fn test_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [storage]
                dsn = "s3://minio:9000/registry"
                page_size = 250

                [cluster]
                kubeconfig = "/etc/regsweep/kubeconfig"

                [sweep]
                failure_policy = "collect"
                malformed_keys = "skip"
                blob_grace_period = "30m"
                "#,
            )?;

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.storage.dsn, "s3://minio:9000/registry");
            assert_eq!(config.storage.page_size, 250);
            assert_eq!(config.storage.root, "docker/registry/v2");
            assert_eq!(
                config.cluster.kubeconfig,
                Some(PathBuf::from("/etc/regsweep/kubeconfig"))
            );
            assert_eq!(config.sweep.failure_policy, FailurePolicy::Collect);
            assert_eq!(config.sweep.malformed_keys, MalformedKeyPolicy::Skip);
            assert_eq!(config.sweep.blob_grace_period, Duration::from_secs(1800));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                [storage]
                dsn = "s3://minio:9000/registry"

                [sweep]
                concurrency = 2
                "#,
            )?;
            jail.set_env("REGSWEEP__SWEEP__CONCURRENCY", "8");
            jail.set_env("REGSWEEP__SWEEP__DRY_RUN", "true");
            jail.set_env("REGSWEEP__STORAGE__ACCESS_KEY_ID", "AKIA");
            jail.set_env("REGSWEEP__STORAGE__ENDPOINT", "http://minio:9000");
            jail.set_env("REGSWEEP__STORAGE__ALLOW_HTTP", "true");

            let config = Configuration::load_from_path(Path::new("custom.toml")).map_err(|e| *e)?;
            assert_eq!(config.storage.dsn, "s3://minio:9000/registry");
            assert_eq!(config.sweep.concurrency, 8);
            assert!(config.sweep.dry_run);
            assert_eq!(config.storage.access_key_id.as_deref(), Some("AKIA"));
            assert_eq!(config.storage.endpoint.as_deref(), Some("http://minio:9000"));
            assert!(config.storage.allow_http);
            Ok(())
        });
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(Configuration::default().validate().is_err());

        let mut config = valid();
        config.storage.root = "/docker/registry/v2".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sweep.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.storage.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.storage.endpoint = Some("http://minio:9000".to_string());
        assert!(config.validate().is_err());
        config.storage.allow_http = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redacted_masks_credentials() {
        let mut config = valid();
        config.storage.dsn = "s3://key:topsecret@minio:9000/registry".to_string();
        config.storage.secret_access_key = Some("alsosecret".to_string());

        let redacted = config.redacted();
        assert!(!redacted.storage.dsn.contains("topsecret"));
        assert!(redacted.storage.dsn.contains("key:***@minio"));
        assert_eq!(redacted.storage.secret_access_key.as_deref(), Some("***"));
    }
}

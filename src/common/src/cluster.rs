use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};

use crate::config::ClusterConfig;

/// Build a Kubernetes client from the cluster configuration.
///
/// An explicit kubeconfig path is read as-is; without one the standard
/// inference chain of `kube` is used.
pub async fn create_kube_client(config: &ClusterConfig) -> Result<kube::Client> {
    let kube_config = match &config.kubeconfig {
        Some(path) => {
            log::info!("Using kubeconfig at {}", path.display());
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("Failed to load kubeconfig")?
        }
        None => kube::Config::infer()
            .await
            .context("Failed to infer cluster configuration")?,
    };

    log::info!("Using cluster at {}", kube_config.cluster_url);

    kube::Client::try_from(kube_config).context("Failed to create cluster client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_missing_kubeconfig_is_an_error() {
        let config = ClusterConfig {
            kubeconfig: Some(PathBuf::from("/nonexistent/regsweep/kubeconfig")),
            ..Default::default()
        };

        let Err(err) = create_kube_client(&config).await else {
            panic!("missing kubeconfig must fail");
        };
        assert!(err.to_string().contains("Failed to read kubeconfig"));
    }
}

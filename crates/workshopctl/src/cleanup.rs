//! Tear clusters down again.

use std::sync::Arc;

use tracing::info;

use crate::cluster::ClusterNumber;
use crate::config::Config;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::fanout::fan_out;
use crate::fsutil;
use crate::provider::{CloudProvider, ClusterMeta, DnsProvider};

/// Delete one cluster, its DNS records and its local kubeconfig.
///
/// The kubeconfig goes last so a later `apply` provisions from scratch.
///
/// # Errors
///
/// Returns the first provider or filesystem error.
pub async fn cleanup_cluster(
    ctx: &RunContext,
    config: &Config,
    index: ClusterNumber,
    cloud: &dyn CloudProvider,
    dns: &dyn DnsProvider,
) -> Result<()> {
    let meta = ClusterMeta::new(config.name.clone(), index);

    info!(name = %meta.name(), "Deleting cluster");
    cloud.delete_cluster(ctx, &meta).await?;

    info!(subdomain = %index.subdomain(), "Deleting DNS records");
    dns.cleanup_records(ctx, &meta).await?;

    fsutil::remove_path(ctx, &ctx.join(&[index.kubeconfig_path()]))
}

/// Clean up one cluster, or the whole fleet when `only` is `None`.
///
/// # Errors
///
/// Returns [`Error::Config`] for an index outside the fleet and
/// [`Error::ClustersFailed`] if any cluster failed.
pub async fn cleanup(
    ctx: &RunContext,
    config: &Arc<Config>,
    only: Option<ClusterNumber>,
    cloud: Arc<dyn CloudProvider>,
    dns: Arc<dyn DnsProvider>,
) -> Result<()> {
    if let Some(index) = only {
        if index.get() == 0 || index.get() > config.clusters {
            return Err(Error::config(format!(
                "cluster {index} is outside the fleet of {} clusters",
                config.clusters
            )));
        }
        let ctx = ctx.for_cluster(index);
        return cleanup_cluster(&ctx, config, index, cloud.as_ref(), dns.as_ref()).await;
    }

    fan_out(ctx, config.clusters, |ctx, index| {
        let config = Arc::clone(config);
        let cloud = Arc::clone(&cloud);
        let dns = Arc::clone(&dns);
        async move { cleanup_cluster(&ctx, &config, index, cloud.as_ref(), dns.as_ref()).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;

    use super::*;
    use crate::provider::{MockCloudProvider, MockDnsProvider};

    fn config(clusters: u16) -> Arc<Config> {
        Arc::new(Config {
            name: "ws".into(),
            clusters,
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn test_cluster_then_records_then_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let kubeconfig = dir.path().join("clusters/02/kubeconfig");
        std::fs::create_dir_all(kubeconfig.parent().unwrap()).unwrap();
        std::fs::write(&kubeconfig, "kind: Config\n").unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();

        let mut seq = Sequence::new();
        let mut cloud = MockCloudProvider::new();
        cloud
            .expect_delete_cluster()
            .withf(|_, meta| meta.name() == "ws-cluster-02")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let mut dns = MockDnsProvider::new();
        dns.expect_cleanup_records()
            .withf(|_, meta| meta.index == ClusterNumber::new(2))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        cleanup(
            &ctx,
            &config(3),
            Some(ClusterNumber::new(2)),
            Arc::new(cloud),
            Arc::new(dns),
        )
        .await
        .unwrap();
        assert!(!kubeconfig.exists());
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let kubeconfig = dir.path().join("clusters/01/kubeconfig");
        std::fs::create_dir_all(kubeconfig.parent().unwrap()).unwrap();
        std::fs::write(&kubeconfig, "kind: Config\n").unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();

        let mut cloud = MockCloudProvider::new();
        cloud
            .expect_delete_cluster()
            .returning(|_, _| Err(Error::provider("api down")));
        let mut dns = MockDnsProvider::new();
        dns.expect_cleanup_records().times(0);

        let err = cleanup(&ctx, &config(1), None, Arc::new(cloud), Arc::new(dns))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ClustersFailed));
        assert!(kubeconfig.exists());
    }

    #[tokio::test]
    async fn test_whole_fleet() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();
        let mut cloud = MockCloudProvider::new();
        cloud.expect_delete_cluster().times(4).returning(|_, _| Ok(()));
        let mut dns = MockDnsProvider::new();
        dns.expect_cleanup_records().times(4).returning(|_, _| Ok(()));

        cleanup(&ctx, &config(4), None, Arc::new(cloud), Arc::new(dns))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_index_outside_fleet() {
        let ctx = RunContext::new(false, "/tmp").unwrap();
        let err = cleanup(
            &ctx,
            &config(2),
            Some(ClusterNumber::new(5)),
            Arc::new(MockCloudProvider::new()),
            Arc::new(MockDnsProvider::new()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

//! Managed Kubernetes (DOKS) clusters.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use url::Url;

use super::client::DigitalOceanClient;
use super::models::{CreateClusterRequest, CreateNodePoolRequest, KubernetesCluster};
use super::WORKSHOPCTL_TAG;
use crate::config::NodeClaim;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::poll::{poll, ConditionError, PollConfig};
use crate::provider::{CloudProvider, Cluster, ClusterMeta, ClusterSpec, ClusterStatus};

/// Droplet size used when no exact match for a node claim exists.
pub const FALLBACK_SIZE: &str = "s-2vcpu-4gb";

/// Map a node claim onto a droplet size slug.
#[must_use]
pub fn choose_size(claim: NodeClaim) -> &'static str {
    match (claim.cpus, claim.ram, claim.dedicated) {
        (2, 2, false) => "s-2vcpu-2gb",
        (2, 4, false) => "s-2vcpu-4gb",
        (4, 8, false) => "s-4vcpu-8gb",
        (8, 16, false) => "s-8vcpu-16gb",
        (2, 4, true) => "c-2",
        (4, 8, true) => "c-4",
        _ => {
            warn!(
                cpus = claim.cpus,
                ram = claim.ram,
                dedicated = claim.dedicated,
                fallback = FALLBACK_SIZE,
                "No droplet size matches the node claim, using fallback"
            );
            FALLBACK_SIZE
        }
    }
}

/// `DigitalOcean` implementation of [`CloudProvider`].
#[derive(Debug, Clone)]
pub struct DigitalOceanCloud {
    client: DigitalOceanClient,
    region: String,
    poll: PollConfig,
}

impl DigitalOceanCloud {
    #[must_use]
    pub fn new(client: DigitalOceanClient, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
            poll: PollConfig::default(),
        }
    }

    /// Override how the provisioning state is polled.
    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    fn create_request(&self, meta: &ClusterMeta, spec: &ClusterSpec) -> Result<CreateClusterRequest> {
        let group = spec
            .node_groups
            .first()
            .ok_or_else(|| Error::config("at least one node group is required"))?;
        let pool_name = meta.node_pool_name();

        Ok(CreateClusterRequest {
            name: meta.name(),
            region: self.region.clone(),
            version: spec.version.clone(),
            tags: vec![WORKSHOPCTL_TAG.to_string()],
            node_pools: vec![CreateNodePoolRequest {
                name: pool_name.clone(),
                size: choose_size(group.node_claim).to_string(),
                count: u32::from(group.instances),
                tags: vec![WORKSHOPCTL_TAG.to_string(), pool_name],
                auto_scale: false,
            }],
            auto_upgrade: false,
        })
    }

    /// Poll the cluster until it is running and return its endpoint.
    async fn wait_running(
        &self,
        ctx: &RunContext,
        id: &str,
    ) -> Result<(Url, Option<IpAddr>, DateTime<Utc>)> {
        let ready = OnceLock::new();
        let client = &self.client;
        let ready_ref = &ready;

        poll(ctx, self.poll, move || async move {
            let cluster = client.get_cluster(id).await?;
            match cluster.status.state.as_str() {
                "running" => {
                    let url = Url::parse(&cluster.endpoint).map_err(|e| {
                        ConditionError::fatal(Error::provider(format!(
                            "cluster endpoint {:?} is not a URL: {e}",
                            cluster.endpoint
                        )))
                    })?;
                    let ip = cluster.ipv4.parse().ok();
                    let _ = ready_ref.set((url, ip, Utc::now()));
                    Ok(true)
                }
                "provisioning" => Err(ConditionError::not_yet("cluster is still provisioning")),
                state => Err(ConditionError::not_yet(format!(
                    "cluster is in state {state:?}: {}",
                    cluster.status.message
                ))),
            }
        })
        .await?;

        ready
            .into_inner()
            .ok_or_else(|| Error::provider(format!("cluster {id} never reported running")))
    }
}

#[async_trait]
impl CloudProvider for DigitalOceanCloud {
    async fn create_cluster(
        &self,
        ctx: &RunContext,
        meta: &ClusterMeta,
        spec: &ClusterSpec,
    ) -> Result<Cluster> {
        let req = self.create_request(meta, spec)?;
        let mut cluster = Cluster {
            meta: meta.clone(),
            spec: spec.clone(),
            status: ClusterStatus {
                provision_start: Some(Utc::now()),
                ..ClusterStatus::default()
            },
        };

        if ctx.is_dry_run() {
            info!(request = %serde_json::to_string(&req)?, "Would send this request to DigitalOcean");
            return Ok(cluster);
        }
        debug!(request = %serde_json::to_string(&req)?, "Cluster create request");

        let existing: Option<KubernetesCluster> = self.client.find_cluster(&req.name).await?;
        let id = if let Some(existing) = existing {
            info!(name = %req.name, id = %existing.id, "Found existing cluster");
            existing.id
        } else {
            info!(name = %req.name, region = %req.region, "Creating new cluster");
            let created = self.client.create_cluster(&req).await?;
            info!(name = %req.name, id = %created.id, "Cluster create request accepted");
            created.id
        };
        cluster.status.id.clone_from(&id);

        let (url, ip, done) = self.wait_running(ctx, &id).await?;
        cluster.status.endpoint_url = Some(url);
        cluster.status.endpoint_ip = ip;
        cluster.status.provision_done = Some(done);
        if let Some(elapsed) = cluster.status.provision_time() {
            info!(name = %req.name, elapsed_secs = elapsed.as_secs(), "Cluster is running");
        }

        cluster.status.kubeconfig = Some(self.client.kubeconfig(&id).await?);
        Ok(cluster)
    }

    async fn delete_cluster(&self, ctx: &RunContext, meta: &ClusterMeta) -> Result<()> {
        let name = meta.name();
        let Some(cluster) = self.client.find_cluster(&name).await? else {
            warn!(name = %name, "Cluster not found, nothing to delete");
            return Ok(());
        };

        let droplets: HashSet<i64> = cluster
            .node_pools
            .iter()
            .flat_map(|pool| &pool.nodes)
            .filter_map(|node| node.droplet_id.parse().ok())
            .collect();

        for lb in self.client.list_load_balancers().await? {
            if !lb.droplet_ids.iter().any(|d| droplets.contains(d)) {
                continue;
            }
            if ctx.is_dry_run() {
                info!(load_balancer = %lb.name, id = %lb.id, "Would delete load balancer");
                continue;
            }
            info!(load_balancer = %lb.name, id = %lb.id, "Deleting load balancer");
            self.client.delete_load_balancer(&lb.id).await?;
        }

        if ctx.is_dry_run() {
            info!(name = %name, id = %cluster.id, "Would delete cluster");
            return Ok(());
        }
        info!(name = %name, id = %cluster.id, "Deleting cluster");
        self.client.delete_cluster(&cluster.id).await
    }
}

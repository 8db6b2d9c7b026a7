//! Cloud and DNS provider abstractions.
//!
//! Concrete providers are looked up by name through the
//! [`ProviderRegistry`]; new providers only need an entry there.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::cluster::ClusterNumber;
use crate::config::NodeGroup;
use crate::context::RunContext;
use crate::error::Result;
use crate::gen::Processor;

pub mod digitalocean;
mod registry;

pub use registry::ProviderRegistry;

/// Identity of a provider-side cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMeta {
    pub name_prefix: String,
    pub index: ClusterNumber,
}

impl ClusterMeta {
    #[must_use]
    pub fn new(name_prefix: impl Into<String>, index: ClusterNumber) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            index,
        }
    }

    /// `<prefix>-cluster-NN`
    #[must_use]
    pub fn name(&self) -> String {
        self.index.resource_name(&self.name_prefix, "cluster")
    }

    /// `<prefix>-nodepool-NN`
    #[must_use]
    pub fn node_pool_name(&self) -> String {
        self.index.resource_name(&self.name_prefix, "nodepool")
    }
}

/// Desired shape of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub version: String,
    pub node_groups: Vec<NodeGroup>,
}

/// What the provider reported about a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterStatus {
    pub id: String,
    pub provision_start: Option<DateTime<Utc>>,
    pub provision_done: Option<DateTime<Utc>>,
    pub endpoint_url: Option<Url>,
    pub endpoint_ip: Option<IpAddr>,
    pub kubeconfig: Option<Vec<u8>>,
}

impl ClusterStatus {
    /// Time from creation request to running, when both ends are known.
    #[must_use]
    pub fn provision_time(&self) -> Option<Duration> {
        let (start, done) = (self.provision_start?, self.provision_done?);
        (done - start).to_std().ok()
    }
}

/// A provider-side cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub meta: ClusterMeta,
    pub spec: ClusterSpec,
    pub status: ClusterStatus,
}

/// Creates and deletes Kubernetes clusters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create the cluster, or adopt an existing one with the same name, and
    /// block until it is running.
    async fn create_cluster(
        &self,
        ctx: &RunContext,
        meta: &ClusterMeta,
        spec: &ClusterSpec,
    ) -> Result<Cluster>;

    /// Delete the cluster and the load balancers attached to it.
    async fn delete_cluster(&self, ctx: &RunContext, meta: &ClusterMeta) -> Result<()>;
}

/// Manages the root DNS zone and contributes manifest processors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Make sure the root domain is managed by this provider.
    async fn ensure_zone(&self, ctx: &RunContext) -> Result<()>;

    /// Delete every record belonging to the cluster's subdomain.
    async fn cleanup_records(&self, ctx: &RunContext, meta: &ClusterMeta) -> Result<()>;

    /// Processors run on the values before `helm template`.
    fn values_processors(&self) -> Vec<Arc<dyn Processor>>;

    /// Processors run on the rendered manifests.
    fn chart_processors(&self) -> Vec<Arc<dyn Processor>>;
}

//! `DigitalOcean` API request and response models.

use serde::{Deserialize, Serialize};

// ============================================================================
// Kubernetes types
// ============================================================================

/// Managed Kubernetes cluster from API.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KubernetesCluster {
    /// Cluster ID (UUID).
    pub id: String,
    /// Cluster name.
    pub name: String,
    /// Region slug.
    #[serde(default)]
    pub region: String,
    /// Kubernetes version slug.
    #[serde(default)]
    pub version: String,
    /// API server URL.
    #[serde(default)]
    pub endpoint: String,
    /// Public IPv4 of the API server.
    #[serde(default)]
    pub ipv4: String,
    /// Current state.
    #[serde(default)]
    pub status: ClusterState,
    /// Node pools.
    #[serde(default)]
    pub node_pools: Vec<NodePool>,
}

/// Cluster status block.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClusterState {
    /// "running", "provisioning", "degraded", "error", "deleted", ...
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub message: String,
}

/// Node pool of a cluster.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodePool {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// One worker node.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Node {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// ID of the backing droplet, as a string.
    #[serde(default)]
    pub droplet_id: String,
}

/// Cluster list response.
#[derive(Debug, Deserialize)]
pub struct ClusterListResponse {
    pub kubernetes_clusters: Vec<KubernetesCluster>,
}

/// Single cluster response.
#[derive(Debug, Deserialize)]
pub struct ClusterResponse {
    pub kubernetes_cluster: KubernetesCluster,
}

/// Create cluster request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateClusterRequest {
    pub name: String,
    pub region: String,
    pub version: String,
    pub tags: Vec<String>,
    pub node_pools: Vec<CreateNodePoolRequest>,
    pub auto_upgrade: bool,
}

/// Node pool inside a create cluster request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateNodePoolRequest {
    pub name: String,
    pub size: String,
    pub count: u32,
    pub tags: Vec<String>,
    pub auto_scale: bool,
}

// ============================================================================
// Load balancer types
// ============================================================================

/// Load balancer from API.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    /// Droplets served by this load balancer.
    #[serde(default)]
    pub droplet_ids: Vec<i64>,
}

/// Load balancer list response.
#[derive(Debug, Deserialize)]
pub struct LoadBalancerListResponse {
    pub load_balancers: Vec<LoadBalancer>,
}

// ============================================================================
// Domain types
// ============================================================================

/// DNS zone.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Domain {
    pub name: String,
    #[serde(default)]
    pub ttl: Option<u32>,
}

/// Single domain response.
#[derive(Debug, Deserialize)]
pub struct DomainResponse {
    pub domain: Domain,
}

/// Create domain request.
#[derive(Debug, Serialize)]
pub struct CreateDomainRequest {
    pub name: String,
}

/// DNS record within a zone.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainRecord {
    pub id: i64,
    #[serde(rename = "type")]
    pub record_type: String,
    /// Name relative to the zone, e.g. `cluster-01` or `*.cluster-01`.
    pub name: String,
    #[serde(default)]
    pub data: String,
}

/// Record list response.
#[derive(Debug, Deserialize)]
pub struct DomainRecordListResponse {
    pub domain_records: Vec<DomainRecord>,
}

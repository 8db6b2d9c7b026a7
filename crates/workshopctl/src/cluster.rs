//! Cluster identity and the per-cluster view of the configuration.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{random_password, Config};
use crate::error::Result;

/// Directory holding one sub-directory per cluster.
pub const CLUSTERS_DIR: &str = "clusters";

/// File name of a cluster's kubeconfig inside its directory.
pub const KUBECONFIG_FILE: &str = "kubeconfig";

/// One-based index of a cluster in the fleet.
///
/// Formats zero-padded to two digits (`01`, `02`, ...), which is the form used
/// for subdomains, directory names and provider resource names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClusterNumber(u16);

impl ClusterNumber {
    #[must_use]
    pub const fn new(n: u16) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Every index of a fleet of `count` clusters, in order.
    pub fn range(count: u16) -> impl Iterator<Item = Self> {
        (1..=count).map(Self)
    }

    /// `cluster-NN`
    #[must_use]
    pub fn subdomain(self) -> String {
        format!("cluster-{self}")
    }

    /// `cluster-NN.<root_domain>`
    #[must_use]
    pub fn domain(self, root_domain: &str) -> String {
        format!("{}.{root_domain}", self.subdomain())
    }

    /// `clusters/NN`, relative to the root directory.
    #[must_use]
    pub fn cluster_dir(self) -> PathBuf {
        PathBuf::from(CLUSTERS_DIR).join(self.to_string())
    }

    /// `clusters/NN/kubeconfig`, relative to the root directory.
    #[must_use]
    pub fn kubeconfig_path(self) -> PathBuf {
        self.cluster_dir().join(KUBECONFIG_FILE)
    }

    /// `<prefix>-<kind>-NN`, e.g. `workshop-cluster-01`.
    #[must_use]
    pub fn resource_name(self, prefix: &str, kind: &str) -> String {
        format!("{prefix}-{kind}-{self}")
    }
}

impl fmt::Display for ClusterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl From<u16> for ClusterNumber {
    fn from(n: u16) -> Self {
        Self(n)
    }
}

/// Read-only view of the configuration for one cluster.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    config: Arc<Config>,
    index: ClusterNumber,
    password: String,
}

impl ClusterInfo {
    /// Build the view for `index`. With unique passwords enabled a fresh
    /// random password is generated on every call, otherwise the
    /// fleet-wide one is used.
    #[must_use]
    pub fn new(config: Arc<Config>, index: ClusterNumber) -> Self {
        let login = &config.cluster_login;
        let password = if login.unique_passwords {
            if !login.common_password.is_empty() {
                warn!(
                    "Both uniquePasswords and commonPassword are set; uniquePasswords wins and commonPassword is ignored"
                );
            }
            random_password()
        } else {
            login.common_password.clone()
        };
        Self {
            config,
            index,
            password,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn index(&self) -> ClusterNumber {
        self.index
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Externally visible domain of this cluster.
    #[must_use]
    pub fn domain(&self) -> String {
        self.index.domain(&self.config.root_domain)
    }

    /// `<username>:<bcrypt hash>` for basic-auth protected ingresses.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing fails.
    pub fn basic_auth(&self) -> Result<String> {
        let hash = bcrypt::hash(&self.password, bcrypt::DEFAULT_COST)?;
        Ok(format!("{}:{hash}", self.config.cluster_login.username))
    }
}

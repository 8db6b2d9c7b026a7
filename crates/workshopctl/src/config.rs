//! Workshop configuration (`workshopctl.yaml`).
//!
//! The file is parsed strictly, validated, and then completed once: defaults
//! are filled in, credential files are read and the git remote is resolved.
//! After completion the configuration is shared read-only behind an `Arc`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::exec::{Command, CommandRunner};

/// Default config file name, relative to the root directory.
pub const DEFAULT_CONFIG_FILE: &str = "workshopctl.yaml";

const DEFAULT_PROVIDER: &str = "digitalocean";
const DEFAULT_USERNAME: &str = "workshopctl";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Prefix for every provider-side name and tag, so several workshop
    /// environments can live in the same account.
    pub name: String,
    pub cloud_provider: ProviderConfig,
    pub dns_provider: ProviderConfig,
    pub root_domain: String,
    /// Number of clusters in the fleet.
    pub clusters: u16,
    pub git: GitConfig,
    pub lets_encrypt_email: String,
    pub tutorials: Tutorials,
    pub cluster_login: ClusterLogin,
    pub node_groups: Vec<NodeGroup>,
}

/// A cloud or DNS provider and how to authenticate against it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ProviderConfig {
    pub name: String,
    /// Path to the credential file, relative to the root directory.
    pub service_account_path: String,
    /// Contents of `service_account_path`, read during completion.
    #[serde(skip)]
    pub service_account_content: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_specific: BTreeMap<String, String>,
}

/// Where the fleet's manifests are stored for GitOps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct GitConfig {
    pub repo: String,
    /// Path to the git provider token.
    pub service_account_path: String,
    #[serde(skip)]
    pub service_account_content: String,
    #[serde(skip)]
    pub repo_ref: Option<RepoRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tutorials {
    pub repo: String,
    pub dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterLogin {
    /// Basic-auth user name.
    pub username: String,
    /// Password shared by every cluster unless `unique_passwords` is set.
    pub common_password: String,
    /// Give every cluster its own random password.
    ///
    /// The password is drawn each time a [`ClusterInfo`](crate::ClusterInfo)
    /// is built and is never persisted, so `gen` and `apply` pick
    /// different passwords for the same cluster.
    pub unique_passwords: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct NodeGroup {
    pub instances: u16,
    pub node_claim: NodeClaim,
}

/// Requested size of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeClaim {
    pub cpus: u16,
    /// Memory in GB.
    pub ram: u16,
    /// Dedicated rather than shared vCPUs.
    pub dedicated: bool,
}

/// A git repository split into its hosting domain, owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub domain: String,
    pub owner: String,
    pub repository: String,
}

impl RepoRef {
    /// Parse `https://host/owner/repo(.git)`, `ssh://git@host/owner/repo`
    /// or scp-like `git@host:owner/repo.git`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no host, owner or repository can
    /// be found.
    pub fn parse(repo: &str) -> Result<Self> {
        let repo = repo.trim();
        let (domain, path) = match url::Url::parse(repo) {
            Ok(u) if u.host_str().is_some() => (
                u.host_str().unwrap_or_default().to_string(),
                u.path().to_string(),
            ),
            _ => {
                // scp-like syntax: [user@]host:path
                let (host, path) = repo
                    .split_once(':')
                    .ok_or_else(|| Error::config(format!("cannot parse git repo {repo:?}")))?;
                let host = host.rsplit('@').next().unwrap_or(host);
                (host.to_string(), path.to_string())
            }
        };

        let mut parts = path.trim_matches('/').split('/').filter(|p| !p.is_empty());
        let (Some(owner), Some(name)) = (parts.next(), parts.next()) else {
            return Err(Error::config(format!(
                "git repo {repo:?} must name both an owner and a repository"
            )));
        };
        if domain.is_empty() {
            return Err(Error::config(format!("git repo {repo:?} has no host")));
        }

        Ok(Self {
            domain,
            owner: owner.to_string(),
            repository: name.trim_end_matches(".git").to_string(),
        })
    }
}

impl Config {
    /// Parse a configuration document, rejecting unknown fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read, validate and complete the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, fails
    /// validation, or cannot be completed.
    pub async fn load(
        ctx: &RunContext,
        path: &Path,
        runner: &dyn CommandRunner,
    ) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration");
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut config = Self::from_yaml(&text)?;
        config.validate()?;
        config.complete(ctx, runner).await?;
        Ok(config)
    }

    /// Check that every required field is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("name must not be empty"));
        }
        if self.cloud_provider.service_account_path.is_empty() {
            return Err(Error::config("must specify cloud provider service account path"));
        }
        if self.dns_provider.service_account_path.is_empty() {
            return Err(Error::config("must specify DNS provider service account path"));
        }
        if self.root_domain.is_empty() {
            return Err(Error::config("root domain must not be empty"));
        }
        if self.lets_encrypt_email.is_empty() {
            return Err(Error::config("Let's Encrypt email must not be empty"));
        }
        if self.git.service_account_path.is_empty() {
            return Err(Error::config("must specify git provider token path"));
        }
        Ok(())
    }

    /// Fill in every default that needs no I/O.
    pub fn apply_defaults(&mut self) {
        if self.cloud_provider.name.is_empty() {
            self.cloud_provider.name = DEFAULT_PROVIDER.to_string();
        }
        if self.dns_provider.name.is_empty() {
            self.dns_provider.name = DEFAULT_PROVIDER.to_string();
        }
        if self.clusters == 0 {
            self.clusters = 1;
        }
        if self.cluster_login.username.is_empty() {
            self.cluster_login.username = DEFAULT_USERNAME.to_string();
        }
        if self.cluster_login.common_password.is_empty() {
            self.cluster_login.common_password = random_password();
        }
        if self.node_groups.is_empty() {
            self.node_groups = vec![NodeGroup {
                instances: 1,
                node_claim: NodeClaim {
                    cpus: 2,
                    ram: 4,
                    dedicated: false,
                },
            }];
        }
    }

    /// One-time completion: defaults, credential files and git remote.
    ///
    /// # Errors
    ///
    /// Returns an error if a credential file cannot be read or the git
    /// repository cannot be determined.
    pub async fn complete(&mut self, ctx: &RunContext, runner: &dyn CommandRunner) -> Result<()> {
        self.apply_defaults();

        self.cloud_provider.service_account_content =
            read_credential(ctx, &self.cloud_provider.service_account_path)?;
        self.dns_provider.service_account_content =
            read_credential(ctx, &self.dns_provider.service_account_path)?;
        self.git.service_account_content = read_credential(ctx, &self.git.service_account_path)?;

        if self.git.repo.is_empty() {
            self.git.repo = detect_origin(ctx, runner).await?;
            info!(repo = %self.git.repo, "Detected git repository from origin remote");
        }
        self.git.repo_ref = Some(RepoRef::parse(&self.git.repo)?);
        Ok(())
    }

    /// Write a starter configuration to `path` unless one already exists.
    ///
    /// Returns whether a file was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn init(ctx: &RunContext, path: &Path) -> Result<bool> {
        if path.exists() {
            info!(path = %path.display(), "Configuration already exists");
            return Ok(false);
        }
        let mut config = Self::default();
        config.apply_defaults();
        let text = serde_yaml::to_string(&config)?;
        crate::fsutil::write_file(ctx, path, text.as_bytes())?;
        info!(path = %path.display(), "Wrote starter configuration");
        Ok(true)
    }
}

/// Eight hex characters of fresh randomness.
#[must_use]
pub fn random_password() -> String {
    hex::encode(rand::random::<[u8; 4]>())
}

fn read_credential(ctx: &RunContext, path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(String::new());
    }
    let full = ctx.join(&[path]);
    let content = std::fs::read_to_string(&full).map_err(|e| Error::io(&full, e))?;
    Ok(content.trim().to_string())
}

async fn detect_origin(ctx: &RunContext, runner: &dyn CommandRunner) -> Result<String> {
    let out = runner
        .run(
            &Command::new("git")
                .args(["remote", "get-url", "origin"])
                .current_dir(ctx.root_dir()),
        )
        .await?;
    let url = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if url.is_empty() {
        return Err(Error::config(
            "git.repo is empty and no origin remote could be detected",
        ));
    }
    Ok(url)
}

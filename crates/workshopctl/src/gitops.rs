//! GitOps bootstrap with `flux`.
//!
//! `flux bootstrap` installs the toolkit into a cluster and commits its own
//! manifests to the fleet repository, so only one cluster may bootstrap at a
//! time. Callers pass the [`FleetLock`] explicitly.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cluster::ClusterInfo;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::exec::{Command, CommandRunner};
use crate::fanout::FleetLock;

/// Controllers installed into every cluster.
pub const COMPONENTS: &str = "source-controller,kustomize-controller,helm-controller";

/// Reconciliation interval; workshops change quickly.
pub const INTERVAL: &str = "30s";

/// Git hosting providers `flux bootstrap` knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitProvider {
    GitHub,
    GitLab,
}

impl GitProvider {
    /// Map a repository host to its provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for any other host.
    pub fn from_domain(domain: &str) -> Result<Self> {
        match domain {
            "github.com" => Ok(Self::GitHub),
            "gitlab.com" => Ok(Self::GitLab),
            other => Err(Error::config(format!(
                "git repo host {other:?}: unknown provider domain"
            ))),
        }
    }

    /// `flux bootstrap` subcommand.
    #[must_use]
    pub fn subcommand(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
        }
    }

    /// Environment variable `flux` reads the token from.
    #[must_use]
    pub fn token_env(self) -> &'static str {
        match self {
            Self::GitHub => "GITHUB_TOKEN",
            Self::GitLab => "GITLAB_TOKEN",
        }
    }
}

/// Build the `flux bootstrap` command for one cluster.
///
/// # Errors
///
/// Returns [`Error::Config`] when the repository was never resolved or is
/// hosted somewhere unsupported.
pub fn bootstrap_command(ctx: &RunContext, info: &ClusterInfo) -> Result<Command> {
    let git = &info.config().git;
    let repo = git
        .repo_ref
        .as_ref()
        .ok_or_else(|| Error::config(format!("git repo {:?} was not resolved", git.repo)))?;
    let provider = GitProvider::from_domain(&repo.domain)?;
    let kubeconfig = ctx.join(&[info.index().kubeconfig_path()]);

    Ok(Command::new("flux")
        .arg(format!("--kubeconfig={}", kubeconfig.display()))
        .arg("bootstrap")
        .arg(provider.subcommand())
        .arg(format!("--owner={}", repo.owner))
        .arg(format!("--repository={}", repo.repository))
        .arg(format!("--path={}", info.index().cluster_dir().display()))
        .arg(format!("--components={COMPONENTS}"))
        .arg(format!("--interval={INTERVAL}"))
        .arg("--personal")
        .env(provider.token_env(), git.service_account_content.clone())
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .env("KUBECONFIG", kubeconfig.display().to_string())
        .current_dir(ctx.root_dir())
        .inherit_output())
}

/// Bootstrap GitOps for one cluster while holding the fleet lock.
///
/// # Errors
///
/// Returns an error if the command cannot be built or `flux` fails.
pub async fn setup_gitops(
    ctx: &RunContext,
    info: &ClusterInfo,
    runner: &Arc<dyn CommandRunner>,
    lock: &FleetLock,
) -> Result<()> {
    let cmd = bootstrap_command(ctx, info)?;

    debug!("Waiting for the fleet lock to bootstrap GitOps");
    let _guard = lock.lock().await;
    info!(cluster = %info.index(), "Bootstrapping GitOps");
    runner.run(&cmd).await?;
    info!(cluster = %info.index(), "Bootstrapping GitOps is done");
    Ok(())
}

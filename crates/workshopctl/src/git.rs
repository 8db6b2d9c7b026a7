//! Prepare the root directory as the fleet's git repository (`push`).

use std::sync::Arc;

use tracing::{info, warn};

use crate::cluster::CLUSTERS_DIR;
use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::exec::{Command, CommandRunner};
use crate::fsutil;

/// Paths that must never be committed, besides the credential files.
pub const IGNORED_PATHS: [&str; 3] = [".cache", ".kube", ".kubeconfig"];

const GITIGNORE: &str = ".gitignore";

/// Runs `git` in the root directory.
pub struct Git {
    runner: Arc<dyn CommandRunner>,
}

impl Git {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, ctx: &RunContext, args: &[&str]) -> Result<String> {
        let out = self
            .runner
            .run(
                &Command::new("git")
                    .args(args.iter().copied())
                    .current_dir(ctx.root_dir()),
            )
            .await?;
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// Initialise the repository, protect secrets in `.gitignore`, stage the
    /// generated manifests and add the `origin` remote.
    ///
    /// Committing and pushing is left to the user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `.git` exists but is not a directory,
    /// and the first `git` or filesystem error otherwise.
    pub async fn prepare(&self, ctx: &RunContext, config: &Config) -> Result<()> {
        let dot_git = ctx.join(&[".git"]);
        let is_new = if !dot_git.exists() {
            self.run(ctx, &["init"]).await?;
            true
        } else if !dot_git.is_dir() {
            return Err(Error::config(format!(
                "{} must be a directory",
                dot_git.display()
            )));
        } else {
            false
        };

        if !is_new && !self.run(ctx, &["branch"]).await?.is_empty() {
            let describe = self.run(ctx, &["describe", "--dirty", "--always"]).await?;
            if describe.contains("dirty") {
                warn!(state = %describe, "git state is dirty");
            }
        }

        let path = ctx.join(&[GITIGNORE]);
        let old = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::io(&path, e)),
        };
        if let Some(new) = extend_gitignore(&old, &ignored_paths(config)) {
            info!(path = %path.display(), "Updating ignore file");
            fsutil::write_file(ctx, &path, new.as_bytes())?;
            self.run(ctx, &["add", GITIGNORE]).await?;
        }

        self.run(ctx, &["add", CLUSTERS_DIR, DEFAULT_CONFIG_FILE])
            .await?;

        if self.run(ctx, &["remote"]).await?.is_empty() {
            self.run(ctx, &["remote", "add", "origin", config.git.repo.as_str()])
                .await?;
        }

        info!("Now run: git commit -m 'Initial commit' && git push --set-upstream origin master");
        Ok(())
    }
}

/// Every path `.gitignore` must list, in a stable order.
fn ignored_paths(config: &Config) -> Vec<&str> {
    let mut paths: Vec<&str> = IGNORED_PATHS.to_vec();
    for cred in [
        config.cloud_provider.service_account_path.as_str(),
        config.dns_provider.service_account_path.as_str(),
        config.git.service_account_path.as_str(),
    ] {
        if !cred.is_empty() && !paths.contains(&cred) {
            paths.push(cred);
        }
    }
    paths
}

/// Append the missing `entries`, or `None` when nothing is missing.
fn extend_gitignore(old: &str, entries: &[&str]) -> Option<String> {
    let missing: Vec<&str> = entries
        .iter()
        .copied()
        .filter(|e| !old.lines().any(|line| line == *e))
        .collect();
    if missing.is_empty() {
        return None;
    }
    let mut new = old.to_string();
    for entry in missing {
        new.push('\n');
        new.push_str(entry);
    }
    new.push('\n');
    Some(new)
}

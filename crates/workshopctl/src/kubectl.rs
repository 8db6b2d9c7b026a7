//! Idempotent `kubectl` invocations.
//!
//! A [`KubectlCommand`] is an explicit plan of steps. Each step is one
//! `kubectl` run with its own set of tolerated error substrings; the plan
//! stops at the first step that fails for any other reason.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::cluster::ClusterNumber;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::exec::{Command, CommandError, CommandRunner};

/// Namespace every workshop component lives in.
pub const WORKSHOPCTL_NAMESPACE: &str = "workshopctl";

/// Name of the per-cluster bootstrap secret.
pub const WORKSHOPCTL_SECRET: &str = "workshopctl";

const ALREADY_EXISTS: &str = "AlreadyExists";
const NOT_FOUND: &str = "NotFound";

/// Entry point bound to one cluster's kubeconfig.
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    kubeconfig: PathBuf,
    namespace: Option<String>,
}

impl std::fmt::Debug for Kubectl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kubectl")
            .field("kubeconfig", &self.kubeconfig)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl Kubectl {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            kubeconfig: kubeconfig.into(),
            namespace: None,
        }
    }

    /// Scope every command to `namespace`.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    /// Start a new command.
    #[must_use]
    pub fn command(&self) -> KubectlCommand {
        KubectlCommand {
            kubectl: self.clone(),
            pre: Vec::new(),
            main: Step::default(),
            files: Vec::new(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "--kubeconfig".to_string(),
            self.kubeconfig.display().to_string(),
        ];
        if let Some(ns) = &self.namespace {
            args.push("-n".to_string());
            args.push(ns.clone());
        }
        args
    }
}

/// One `kubectl` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    pub args: Vec<String>,
    pub ignored: Vec<String>,
}

/// Options for [`KubectlCommand::create`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Treat "AlreadyExists" as success.
    pub ignore_exists: bool,
    /// Delete the resource first, tolerating "NotFound".
    pub recreate: bool,
}

/// A planned, not yet executed, `kubectl` command.
#[derive(Debug)]
pub struct KubectlCommand {
    kubectl: Kubectl,
    pre: Vec<Step>,
    main: Step,
    files: Vec<PathBuf>,
}

impl KubectlCommand {
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.main.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Attach a manifest as `-f <path>`.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.main.args.push("-f".to_string());
        self.main.args.push(path.display().to_string());
        self.files.push(path);
        self
    }

    /// Treat a failure whose output contains `needle` as success.
    #[must_use]
    pub fn ignore(mut self, needle: impl Into<String>) -> Self {
        self.main.ignored.push(needle.into());
        self
    }

    /// `create <kind> [subkind] <name>`, optionally idempotent.
    #[must_use]
    pub fn create(
        mut self,
        kind: &str,
        subkind: Option<&str>,
        name: &str,
        opts: CreateOptions,
    ) -> Self {
        self.main.args.push("create".to_string());
        self.main.args.push(kind.to_string());
        if let Some(sub) = subkind {
            self.main.args.push(sub.to_string());
        }
        self.main.args.push(name.to_string());

        if opts.ignore_exists {
            self.main.ignored.push(ALREADY_EXISTS.to_string());
        }
        if opts.recreate {
            self.pre.push(Step {
                args: vec!["delete".to_string(), kind.to_string(), name.to_string()],
                ignored: vec![NOT_FOUND.to_string()],
            });
        }
        self
    }

    /// Every step in execution order, with full argument lists.
    #[must_use]
    pub fn plan(&self) -> Vec<Step> {
        let base = self.kubectl.base_args();
        self.pre
            .iter()
            .chain(std::iter::once(&self.main))
            .map(|step| Step {
                args: base.iter().cloned().chain(step.args.iter().cloned()).collect(),
                ignored: step.ignored.clone(),
            })
            .collect()
    }

    /// Execute the plan, returning the output of the last step.
    ///
    /// # Errors
    ///
    /// Returns the first command failure whose output contains none of
    /// that step's tolerated substrings.
    pub async fn run(self) -> Result<String> {
        if !self.files.is_empty() {
            debug!(files = ?self.files, "Sending manifests to kubectl");
        }
        let mut last = String::new();
        for step in self.plan() {
            last = run_step(self.kubectl.runner.as_ref(), &step).await?;
        }
        Ok(last)
    }
}

/// Environment variable selecting the cluster for [`passthrough`].
pub const CLUSTER_ENV: &str = "WORKSHOPCTL_CLUSTER";

/// `kubectl <args>` against one cluster, output streamed to the terminal.
#[must_use]
pub fn passthrough_command(ctx: &RunContext, index: ClusterNumber, args: &[String]) -> Command {
    Command::new("kubectl")
        .args(args.iter().cloned())
        .env("KUBECONFIG", ctx.join(&[index.kubeconfig_path()]).display().to_string())
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .inherit_output()
}

/// Run `kubectl` with the cluster's kubeconfig.
///
/// # Errors
///
/// Returns [`Error::Command`] if `kubectl` exits non-zero.
pub async fn passthrough(
    ctx: &RunContext,
    runner: &dyn CommandRunner,
    index: ClusterNumber,
    args: &[String],
) -> Result<()> {
    runner.run(&passthrough_command(ctx, index, args)).await?;
    Ok(())
}

async fn run_step(runner: &dyn CommandRunner, step: &Step) -> Result<String> {
    let cmd = Command::new("kubectl").args(step.args.iter().cloned());
    match runner.run(&cmd).await {
        Ok(out) => Ok(out.combined()),
        Err(err @ CommandError::Failed { .. }) => {
            if let Some(needle) = step.ignored.iter().find(|n| err.output().contains(n.as_str())) {
                debug!(command = %cmd, tolerated = %needle, "Ignoring tolerated kubectl failure");
                Ok(err.output().to_string())
            } else {
                Err(Error::Command(err))
            }
        }
        Err(err) => Err(Error::Command(err)),
    }
}

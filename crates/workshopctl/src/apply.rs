//! Bring every cluster of the fleet to a ready state.
//!
//! Each cluster walks the same ordered steps. Every step is idempotent, so
//! re-running `apply` after a failure resumes where it makes sense and
//! repeats the rest harmlessly. There is no rollback.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cluster::ClusterInfo;
use crate::config::Config;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::fanout::{for_each_cluster, FleetLock};
use crate::fsutil;
use crate::gitops;
use crate::kubectl::{CreateOptions, Kubectl, WORKSHOPCTL_NAMESPACE, WORKSHOPCTL_SECRET};
use crate::params::Parameters;
use crate::poll::PollConfig;
use crate::provider::{CloudProvider, ClusterMeta, ClusterSpec, DnsProvider};
use crate::waiter::{DnsResolver, Waiter};

/// Addons applied from `clusters/NN/<addon>.yaml`, in order.
pub const REQUIRED_ADDONS: &[&str] = &["core-workshop-infra"];

/// Kubernetes version requested for new clusters.
pub const CLUSTER_VERSION: &str = "latest";

/// Per-cluster apply progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ApplyStep {
    /// No kubeconfig on disk yet.
    NeedsProvision,
    /// The cluster runs and its kubeconfig is stored.
    Provisioned,
    /// The workshopctl namespace exists.
    NamespaceReady,
    /// The workshopctl secret holds the current parameters.
    SecretApplied,
    /// Flux reconciles the cluster directory.
    GitOpsBootstrapped,
    /// Required addons are applied.
    AddonsApplied,
    /// Every readiness check passed.
    Ready,
}

impl ApplyStep {
    /// Get the next step in the sequence.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::NeedsProvision => Self::Provisioned,
            Self::Provisioned => Self::NamespaceReady,
            Self::NamespaceReady => Self::SecretApplied,
            Self::SecretApplied => Self::GitOpsBootstrapped,
            Self::GitOpsBootstrapped => Self::AddonsApplied,
            Self::AddonsApplied | Self::Ready => Self::Ready,
        }
    }

    /// What moving out of this step does.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::NeedsProvision => "Provisioning the Kubernetes cluster",
            Self::Provisioned => "Applying workshopctl Namespace",
            Self::NamespaceReady => "Applying workshopctl Secret",
            Self::SecretApplied => "Bootstrapping GitOps",
            Self::GitOpsBootstrapped => "Applying addons",
            Self::AddonsApplied => "Waiting for the cluster to be ready",
            Self::Ready => "Ready",
        }
    }

    /// Get the step number for progress display.
    #[must_use]
    pub fn step_number(self) -> u8 {
        match self {
            Self::NeedsProvision => 0,
            Self::Provisioned => 1,
            Self::NamespaceReady => 2,
            Self::SecretApplied => 3,
            Self::GitOpsBootstrapped => 4,
            Self::AddonsApplied => 5,
            Self::Ready => 6,
        }
    }

    /// Total number of steps.
    pub const TOTAL_STEPS: u8 = 6;
}

impl std::fmt::Display for ApplyStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Runs the apply steps for single clusters.
pub struct Applier {
    runner: Arc<dyn CommandRunner>,
    cloud: Arc<dyn CloudProvider>,
    resolver: Arc<dyn DnsResolver>,
    lock: FleetLock,
    poll: PollConfig,
    tls_check: bool,
}

impl std::fmt::Debug for Applier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Applier")
            .field("poll", &self.poll)
            .field("tls_check", &self.tls_check)
            .finish_non_exhaustive()
    }
}

impl Applier {
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cloud: Arc<dyn CloudProvider>,
        resolver: Arc<dyn DnsResolver>,
        lock: FleetLock,
    ) -> Self {
        Self {
            runner,
            cloud,
            resolver,
            lock,
            poll: PollConfig::default(),
            tls_check: false,
        }
    }

    /// Poll settings for the readiness checks.
    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn with_tls_check(mut self, enabled: bool) -> Self {
        self.tls_check = enabled;
        self
    }

    /// Walk one cluster from [`ApplyStep::NeedsProvision`] to
    /// [`ApplyStep::Ready`].
    ///
    /// # Errors
    ///
    /// Returns the error of the first step that failed.
    pub async fn apply_cluster(&self, ctx: &RunContext, info: &ClusterInfo) -> Result<()> {
        let mut step = ApplyStep::NeedsProvision;
        while step != ApplyStep::Ready {
            debug!(
                step = step.step_number(),
                total = ApplyStep::TOTAL_STEPS,
                "{step}"
            );
            self.leave(ctx, info, step).await?;
            step = step.next();
        }
        info!("Cluster is ready");
        Ok(())
    }

    /// Perform the transition out of `step`.
    async fn leave(&self, ctx: &RunContext, info: &ClusterInfo, step: ApplyStep) -> Result<()> {
        let kubeconfig = ctx.join(&[info.index().kubeconfig_path()]);
        let kubectl = Kubectl::new(Arc::clone(&self.runner), kubeconfig.clone());

        match step {
            ApplyStep::NeedsProvision => {
                if kubeconfig.exists() {
                    info!(
                        path = %kubeconfig.display(),
                        "Assuming cluster is already provisioned, as the kubeconfig exists"
                    );
                    return Ok(());
                }
                self.provision(ctx, info, &kubeconfig).await
            }
            ApplyStep::Provisioned => {
                info!("Applying workshopctl Namespace");
                kubectl
                    .command()
                    .create(
                        "namespace",
                        None,
                        WORKSHOPCTL_NAMESPACE,
                        CreateOptions {
                            ignore_exists: true,
                            recreate: false,
                        },
                    )
                    .run()
                    .await?;
                Ok(())
            }
            ApplyStep::NamespaceReady => {
                info!("Applying workshopctl Secret");
                let params = Parameters::from_cluster(info)?;
                let literals = params
                    .to_map()?
                    .into_iter()
                    .map(|(k, v)| format!("--from-literal={k}={v}"));
                kubectl
                    .namespace(WORKSHOPCTL_NAMESPACE)
                    .command()
                    .create(
                        "secret",
                        Some("generic"),
                        WORKSHOPCTL_SECRET,
                        CreateOptions {
                            ignore_exists: true,
                            recreate: true,
                        },
                    )
                    .args(literals)
                    .run()
                    .await?;
                Ok(())
            }
            ApplyStep::SecretApplied => {
                gitops::setup_gitops(ctx, info, &self.runner, &self.lock).await
            }
            ApplyStep::GitOpsBootstrapped => {
                let kubectl = kubectl.namespace(WORKSHOPCTL_NAMESPACE);
                for addon in REQUIRED_ADDONS {
                    let path = ctx
                        .join(&[info.index().cluster_dir()])
                        .join(format!("{addon}.yaml"));
                    info!(addon, path = %path.display(), "Applying addon");
                    kubectl.command().args(["apply"]).file(path).run().await?;
                }
                Ok(())
            }
            ApplyStep::AddonsApplied => {
                Waiter::new(kubectl, info.domain(), Arc::clone(&self.resolver))
                    .with_poll(self.poll)
                    .with_tls_check(self.tls_check)
                    .wait_for_all(ctx)
                    .await
            }
            ApplyStep::Ready => Ok(()),
        }
    }

    async fn provision(&self, ctx: &RunContext, info: &ClusterInfo, kubeconfig: &Path) -> Result<()> {
        let config = info.config();
        let meta = ClusterMeta::new(config.name.clone(), info.index());
        let spec = ClusterSpec {
            version: CLUSTER_VERSION.to_string(),
            node_groups: config.node_groups.clone(),
        };

        info!(name = %meta.name(), "Provisioning cluster");
        let cluster = self.cloud.create_cluster(ctx, &meta, &spec).await?;

        if let Some(took) = cluster.status.provision_time() {
            info!(name = %meta.name(), took = ?took, "Provisioning finished");
        }
        let Some(bytes) = cluster.status.kubeconfig else {
            if ctx.is_dry_run() {
                return Ok(());
            }
            return Err(Error::provider(format!(
                "provider returned no kubeconfig for {}",
                meta.name()
            )));
        };

        info!(path = %kubeconfig.display(), "Writing kubeconfig");
        fsutil::write_private_file(ctx, kubeconfig, &bytes)
    }
}

/// Apply the whole fleet: make sure the DNS zone exists, then run every
/// cluster concurrently.
///
/// # Errors
///
/// Returns the zone error, or [`Error::ClustersFailed`] if any cluster
/// failed.
pub async fn apply(
    ctx: &RunContext,
    config: &Arc<Config>,
    applier: Arc<Applier>,
    dns: &dyn DnsProvider,
) -> Result<()> {
    dns.ensure_zone(ctx).await?;

    for_each_cluster(ctx, config, |ctx, info| {
        let applier = Arc::clone(&applier);
        async move { applier.apply_cluster(&ctx, &info).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockall::Sequence;

    use super::*;
    use crate::cluster::ClusterNumber;
    use crate::config::{ClusterLogin, GitConfig, RepoRef};
    use crate::exec::{Command, CommandError, CommandOutput, MockCommandRunner};
    use crate::provider::{Cluster, ClusterStatus, MockCloudProvider, MockDnsProvider};
    use crate::waiter::MockDnsResolver;

    fn config() -> Arc<Config> {
        Arc::new(Config {
            name: "ws".into(),
            root_domain: "workshop.example.com".into(),
            clusters: 1,
            lets_encrypt_email: "ops@example.com".into(),
            cluster_login: ClusterLogin {
                username: "workshopctl".into(),
                common_password: "hunter2".into(),
                unique_passwords: false,
            },
            git: GitConfig {
                repo: "https://github.com/acme/fleet".into(),
                service_account_content: "ghp_token".into(),
                repo_ref: Some(RepoRef {
                    domain: "github.com".into(),
                    owner: "acme".into(),
                    repository: "fleet".into(),
                }),
                ..GitConfig::default()
            },
            ..Config::default()
        })
    }

    fn args(cmd: &Command) -> String {
        cmd.get_args().join(" ")
    }

    fn ok(out: &'static str) -> impl FnMut(&Command) -> std::result::Result<CommandOutput, CommandError> {
        move |_| Ok(CommandOutput::from_stdout(out))
    }

    fn expect_bootstrap(runner: &mut MockCommandRunner, seq: &mut Sequence) {
        runner
            .expect_run()
            .withf(|c| args(c).ends_with("create namespace workshopctl"))
            .times(1)
            .in_sequence(seq)
            .returning(|_| {
                Err(CommandError::Failed {
                    command: "kubectl create namespace workshopctl".into(),
                    exit_code: Some(1),
                    output: "Error from server (AlreadyExists): namespaces \"workshopctl\" already exists".into(),
                })
            });
        runner
            .expect_run()
            .withf(|c| args(c).ends_with("-n workshopctl delete secret workshopctl"))
            .times(1)
            .in_sequence(seq)
            .returning(ok(""));
        runner
            .expect_run()
            .withf(|c| {
                let a = args(c);
                a.contains("-n workshopctl create secret generic workshopctl")
                    && a.contains("--from-literal=CLUSTER_DOMAIN=cluster-01.workshop.example.com")
                    && a.contains("--from-literal=CLUSTER_PASSWORD=hunter2")
            })
            .times(1)
            .in_sequence(seq)
            .returning(ok("secret/workshopctl created"));
        runner
            .expect_run()
            .withf(|c| c.program() == "flux")
            .times(1)
            .in_sequence(seq)
            .returning(ok(""));
        runner
            .expect_run()
            .withf(|c| {
                let a = args(c);
                a.contains("-n workshopctl apply -f ")
                    && a.ends_with("/clusters/01/core-workshop-infra.yaml")
            })
            .times(1)
            .in_sequence(seq)
            .returning(ok("deployment.apps/traefik configured"));
        runner
            .expect_run()
            .withf(|c| args(c).contains("wait deployment"))
            .times(1)
            .in_sequence(seq)
            .returning(ok(""));
        runner
            .expect_run()
            .withf(|c| args(c).contains("get svc traefik"))
            .times(1)
            .in_sequence(seq)
            .returning(ok("1.2.3.4"));
    }

    fn resolver() -> MockDnsResolver {
        let mut resolver = MockDnsResolver::new();
        resolver
            .expect_lookup_ip()
            .returning(|_| Ok(vec!["1.2.3.4".parse().unwrap()]));
        resolver
    }

    fn applier(runner: MockCommandRunner, cloud: MockCloudProvider) -> Applier {
        Applier::new(
            Arc::new(runner),
            Arc::new(cloud),
            Arc::new(resolver()),
            FleetLock::new(),
        )
        .with_poll(PollConfig::default().with_interval(Duration::from_millis(1)))
    }

    #[test]
    fn test_steps_are_strictly_ordered() {
        let mut step = ApplyStep::NeedsProvision;
        let mut seen = vec![step];
        while step != ApplyStep::Ready {
            step = step.next();
            seen.push(step);
        }
        assert_eq!(seen.len(), usize::from(ApplyStep::TOTAL_STEPS) + 1);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ApplyStep::Ready.next(), ApplyStep::Ready);
        assert_eq!(ApplyStep::SecretApplied.to_string(), "Bootstrapping GitOps");
    }

    #[tokio::test]
    async fn test_existing_kubeconfig_skips_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("clusters/01")).unwrap();
        std::fs::write(dir.path().join("clusters/01/kubeconfig"), "kind: Config\n").unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap().for_cluster(ClusterNumber::new(1));

        let mut cloud = MockCloudProvider::new();
        cloud.expect_create_cluster().times(0);

        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(ok("1.2.3.4"));
        let info = ClusterInfo::new(config(), ClusterNumber::new(1));

        applier(runner, cloud).apply_cluster(&ctx, &info).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_sequence_writes_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();

        let mut cloud = MockCloudProvider::new();
        cloud
            .expect_create_cluster()
            .withf(|_, meta, spec| meta.name() == "ws-cluster-01" && spec.version == "latest")
            .times(1)
            .returning(|_, meta, spec| {
                Ok(Cluster {
                    meta: meta.clone(),
                    spec: spec.clone(),
                    status: ClusterStatus {
                        id: "abc".into(),
                        kubeconfig: Some(b"kind: Config\n".to_vec()),
                        ..ClusterStatus::default()
                    },
                })
            });

        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        expect_bootstrap(&mut runner, &mut seq);
        let info = ClusterInfo::new(config(), ClusterNumber::new(1));

        applier(runner, cloud).apply_cluster(&ctx, &info).await.unwrap();
        let path = dir.path().join("clusters/01/kubeconfig");
        assert_eq!(std::fs::read(&path).unwrap(), b"kind: Config\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_from_provider_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();
        let mut cloud = MockCloudProvider::new();
        cloud.expect_create_cluster().returning(|_, meta, spec| {
            Ok(Cluster {
                meta: meta.clone(),
                spec: spec.clone(),
                status: ClusterStatus::default(),
            })
        });
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(0);
        let info = ClusterInfo::new(config(), ClusterNumber::new(1));

        let err = applier(runner, cloud)
            .apply_cluster(&ctx, &info)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    async fn test_fleet_apply_ensures_zone_first() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();
        let mut dns = MockDnsProvider::new();
        dns.expect_ensure_zone()
            .times(1)
            .returning(|_| Err(Error::Api {
                status: 401,
                message: "unauthorized".into(),
            }));
        let mut cloud = MockCloudProvider::new();
        cloud.expect_create_cluster().times(0);

        let err = apply(
            &ctx,
            &config(),
            Arc::new(applier(MockCommandRunner::new(), cloud)),
            &dns,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_fleet_apply_reports_aggregate_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();
        let mut dns = MockDnsProvider::new();
        dns.expect_ensure_zone().returning(|_| Ok(()));
        let mut cloud = MockCloudProvider::new();
        cloud
            .expect_create_cluster()
            .returning(|_, _, _| Err(Error::provider("quota exceeded")));

        let err = apply(
            &ctx,
            &config(),
            Arc::new(applier(MockCommandRunner::new(), cloud)),
            &dns,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ClustersFailed));
    }
}

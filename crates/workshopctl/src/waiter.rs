//! Readiness checks run at the end of `apply`.
//!
//! Each check is a bounded [`poll`]; a failed check is reported with its
//! name so the operator knows which condition was never reached.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tracing::info;

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::kubectl::{Kubectl, WORKSHOPCTL_NAMESPACE};
use crate::poll::{poll, ConditionError, PollConfig};

/// Public resolver queried directly, so no local cache hides propagation.
pub const PUBLIC_RESOLVER: IpAddr = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves host names to addresses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn lookup_ip(&self, domain: &str) -> Result<Vec<IpAddr>>;
}

/// Uncached resolver talking to [`PUBLIC_RESOLVER`] over UDP.
pub struct PublicResolver {
    resolver: TokioAsyncResolver,
}

impl std::fmt::Debug for PublicResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicResolver").finish_non_exhaustive()
    }
}

impl Default for PublicResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicResolver {
    #[must_use]
    pub fn new() -> Self {
        let servers = NameServerConfigGroup::from_ips_clear(&[PUBLIC_RESOLVER], 53, true);
        let config = ResolverConfig::from_parts(None, Vec::new(), servers);
        let mut opts = ResolverOpts::default();
        opts.cache_size = 0;
        opts.timeout = LOOKUP_TIMEOUT;
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl DnsResolver for PublicResolver {
    async fn lookup_ip(&self, domain: &str) -> Result<Vec<IpAddr>> {
        let lookup = self
            .resolver
            .lookup_ip(domain)
            .await
            .map_err(|e| Error::Lookup {
                domain: domain.to_string(),
                message: e.to_string(),
            })?;
        Ok(lookup.iter().collect())
    }
}

/// A named readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Every Deployment in the workshopctl namespace is Available.
    Deployments,
    /// The cluster domain resolves to the ingress load balancer.
    DnsPropagation,
    /// Traefik was restarted to pick up its certificates.
    TlsSetup,
}

impl Check {
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Deployments => "deployments to be Ready",
            Self::DnsPropagation => "DNS to have propagated",
            Self::TlsSetup => "TLS certs to have been created",
        }
    }
}

impl std::fmt::Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// How the checks are scheduled relative to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitMode {
    /// One after another, stopping at the first failure.
    #[default]
    Sequential,
    /// All at once; the first failure is reported.
    Concurrent,
}

/// Runs the readiness checks against one cluster.
pub struct Waiter {
    kubectl: Kubectl,
    domain: String,
    resolver: Arc<dyn DnsResolver>,
    poll: PollConfig,
    mode: WaitMode,
    tls_check: bool,
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("domain", &self.domain)
            .field("mode", &self.mode)
            .field("tls_check", &self.tls_check)
            .finish_non_exhaustive()
    }
}

impl Waiter {
    /// `kubectl` is scoped to the workshopctl namespace.
    #[must_use]
    pub fn new(kubectl: Kubectl, domain: impl Into<String>, resolver: Arc<dyn DnsResolver>) -> Self {
        Self {
            kubectl: kubectl.namespace(WORKSHOPCTL_NAMESPACE),
            domain: domain.into(),
            resolver,
            poll: PollConfig::default(),
            mode: WaitMode::default(),
            tls_check: false,
        }
    }

    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: WaitMode) -> Self {
        self.mode = mode;
        self
    }

    /// Also restart traefik once the other checks passed.
    #[must_use]
    pub fn with_tls_check(mut self, enabled: bool) -> Self {
        self.tls_check = enabled;
        self
    }

    /// Checks in the order they run.
    #[must_use]
    pub fn checks(&self) -> Vec<Check> {
        let mut checks = vec![Check::Deployments, Check::DnsPropagation];
        if self.tls_check {
            checks.push(Check::TlsSetup);
        }
        checks
    }

    /// Run every enabled check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Check`] for the first check that failed.
    pub async fn wait_for_all(&self, ctx: &RunContext) -> Result<()> {
        let checks = self.checks();
        match self.mode {
            WaitMode::Sequential => {
                for check in checks {
                    self.timed(ctx, check).await?;
                }
            }
            WaitMode::Concurrent => {
                futures::future::try_join_all(checks.into_iter().map(|c| self.timed(ctx, c)))
                    .await?;
            }
        }
        Ok(())
    }

    async fn timed(&self, ctx: &RunContext, check: Check) -> Result<()> {
        info!("Waiting for {check}...");
        let start = Instant::now();
        let result = match check {
            Check::Deployments => self.wait_for_deployments(ctx).await,
            Check::DnsPropagation => self.wait_for_dns_propagation(ctx).await,
            Check::TlsSetup => self.restart_traefik().await,
        };
        result.map_err(|e| Error::Check {
            check: check.description(),
            source: Box::new(e),
        })?;
        info!(elapsed = ?start.elapsed(), "Waiting for {check} done");
        Ok(())
    }

    /// Poll `kubectl wait` until every Deployment is Available.
    ///
    /// # Errors
    ///
    /// Returns a poll error when the deadline passes first.
    pub async fn wait_for_deployments(&self, ctx: &RunContext) -> Result<()> {
        let kubectl = &self.kubectl;
        poll(ctx, self.poll, move || async move {
            // kubectl blocks up to 30s itself; the outer deadline still applies
            kubectl
                .command()
                .args(["wait", "deployment", "--for=condition=Available", "--all", "--timeout=30s"])
                .run()
                .await?;
            Ok::<_, ConditionError>(true)
        })
        .await
    }

    /// Wait for traefik's load balancer IP, then for the cluster domain to
    /// resolve to exactly that IP.
    ///
    /// # Errors
    ///
    /// Returns a poll error when either phase runs out of time.
    pub async fn wait_for_dns_propagation(&self, ctx: &RunContext) -> Result<()> {
        let found = OnceLock::new();
        let kubectl = &self.kubectl;
        let found_ref = &found;
        poll(ctx, self.poll, move || async move {
            let addr = kubectl
                .command()
                .args([
                    "get",
                    "svc",
                    "traefik",
                    "-otemplate",
                    "--template={{ (index .status.loadBalancer.ingress 0).ip }}",
                ])
                .run()
                .await?;
            let ip: IpAddr = addr
                .trim()
                .parse()
                .map_err(|_| ConditionError::not_yet(format!("no valid IP yet: {addr:?}")))?;
            info!(ip = %ip, "Got LoadBalancer IP for Traefik");
            let _ = found_ref.set(ip);
            Ok::<_, ConditionError>(true)
        })
        .await?;

        let Some(expected) = found.into_inner() else {
            if ctx.is_dry_run() {
                info!(domain = %self.domain, "Would wait for the domain to resolve to the load balancer IP");
                return Ok(());
            }
            return Err(Error::provider("traefik load balancer IP was never found"));
        };

        let resolver = self.resolver.as_ref();
        let domain = self.domain.as_str();
        poll(ctx, self.poll, move || async move {
            let ips = resolver.lookup_ip(domain).await?;
            if ips.contains(&expected) {
                info!(domain, ip = %expected, "Domain now resolves to the expected IP");
                Ok(true)
            } else {
                Err(ConditionError::not_yet(format!(
                    "{domain} does not resolve to {expected} yet, got {ips:?}"
                )))
            }
        })
        .await
    }

    /// Delete the traefik pods so they restart and request certificates.
    ///
    /// # Errors
    ///
    /// Returns an error if `kubectl delete` fails.
    pub async fn restart_traefik(&self) -> Result<()> {
        self.kubectl
            .command()
            .args(["delete", "pod", "-l=app=traefik"])
            .run()
            .await?;
        info!("Restarted traefik");
        Ok(())
    }
}

//! workshopctl CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use workshopctl::apply::{self, Applier};
use workshopctl::cleanup;
use workshopctl::config::{Config, DEFAULT_CONFIG_FILE};
use workshopctl::exec::check_binaries;
use workshopctl::fanout::FleetLock;
use workshopctl::gen::{self, GenerateOptions};
use workshopctl::git::Git;
use workshopctl::kubectl::{self, CLUSTER_ENV};
use workshopctl::waiter::PublicResolver;
use workshopctl::{ClusterNumber, CommandRunner, ProviderRegistry, RunContext, SystemRunner};

/// Provision and manage fleets of workshop Kubernetes clusters.
#[derive(Parser)]
#[command(name = "workshopctl", version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Directory holding the configuration, charts and generated clusters.
    #[arg(long, global = true, default_value = ".")]
    root_dir: PathBuf,

    /// Configuration file, relative to the root directory.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config_path: PathBuf,

    /// Log what would be done instead of doing it.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file if none exists.
    Init,

    /// Render the manifests of every chart for every cluster.
    Gen {
        /// Only render the built-in charts.
        #[arg(long)]
        skip_local_charts: bool,
    },

    /// Provision, bootstrap and verify every cluster.
    Apply {
        /// Also restart the reverse proxy so it picks up TLS certificates.
        #[arg(long)]
        tls_check: bool,
    },

    /// Delete clusters, their DNS records and their kubeconfigs.
    Cleanup {
        /// Only clean up this cluster.
        #[arg(long)]
        cluster: Option<u16>,
    },

    /// Run kubectl against one cluster.
    Kubectl {
        /// Cluster number.
        #[arg(short, long, env = CLUSTER_ENV)]
        cluster: u16,

        /// Arguments passed to kubectl.
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Prepare the root directory as the fleet's git repository.
    Push,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.global.verbose {
            EnvFilter::new("info,workshopctl=debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let ctx = RunContext::new(cli.global.dry_run, &cli.global.root_dir)?;
    let config_path = ctx.join(&[&cli.global.config_path]);
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(ctx.is_dry_run()));

    match cli.command {
        Commands::Init => {
            Config::init(&ctx, &config_path)?;
        }
        Commands::Gen { skip_local_charts } => {
            check_binaries(&ctx, &["helm"])?;
            let config = load_config(&ctx, &config_path).await?;
            let dns = ProviderRegistry::default().dns(&config.dns_provider, &config.root_domain)?;
            gen::generate(&ctx, &config, runner, dns, GenerateOptions { skip_local_charts }).await?;
        }
        Commands::Apply { tls_check } => {
            check_binaries(&ctx, &["kubectl", "flux"])?;
            let config = load_config(&ctx, &config_path).await?;
            let registry = ProviderRegistry::default();
            let cloud = registry.cloud(&config.cloud_provider)?;
            let dns = registry.dns(&config.dns_provider, &config.root_domain)?;
            let applier = Applier::new(
                runner,
                cloud,
                Arc::new(PublicResolver::new()),
                FleetLock::new(),
            )
            .with_tls_check(tls_check);
            apply::apply(&ctx, &config, Arc::new(applier), dns.as_ref()).await?;
            info!(clusters = config.clusters, "All clusters are ready");
        }
        Commands::Cleanup { cluster } => {
            let config = load_config(&ctx, &config_path).await?;
            let registry = ProviderRegistry::default();
            let cloud = registry.cloud(&config.cloud_provider)?;
            let dns = registry.dns(&config.dns_provider, &config.root_domain)?;
            cleanup::cleanup(&ctx, &config, cluster.map(ClusterNumber::new), cloud, dns).await?;
        }
        Commands::Kubectl { cluster, args } => {
            // kubectl is interactive, so it also runs under --dry-run
            check_binaries(&ctx.with_dry_run(false), &["kubectl"])?;
            let runner = SystemRunner::new(false);
            kubectl::passthrough(&ctx, &runner, ClusterNumber::new(cluster), &args).await?;
        }
        Commands::Push => {
            check_binaries(&ctx, &["git"])?;
            let config = load_config(&ctx, &config_path).await?;
            Git::new(runner).prepare(&ctx, &config).await?;
        }
    }
    Ok(())
}

async fn load_config(ctx: &RunContext, path: &Path) -> Result<Arc<Config>> {
    // reading the git remote is safe under --dry-run
    let config = Config::load(ctx, path, &SystemRunner::new(false))
        .await
        .with_context(|| format!("Failed to load {}", path.display()))?;
    Ok(Arc::new(config))
}

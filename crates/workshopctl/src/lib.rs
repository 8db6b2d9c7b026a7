//! Provisioning for fleets of short-lived Kubernetes workshop clusters.
//!
//! `workshopctl` renders per-cluster manifests from Helm charts, creates the
//! clusters at a cloud provider, bootstraps GitOps into each of them and
//! waits until every cluster serves traffic under its own subdomain.
//!
//! Every cluster runs its own workflow concurrently; one failing cluster
//! never stops the others, and the fleet operation fails once all of them
//! have finished.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use workshopctl::config::Config;
//! use workshopctl::context::RunContext;
//! use workshopctl::exec::SystemRunner;
//! use workshopctl::gen::{generate, GenerateOptions};
//! use workshopctl::provider::ProviderRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = RunContext::new(false, ".")?;
//!     let runner = Arc::new(SystemRunner::new(false));
//!     let config = Config::load(&ctx, "workshopctl.yaml".as_ref(), runner.as_ref()).await?;
//!     let dns = ProviderRegistry::default().dns(&config.dns_provider, &config.root_domain)?;
//!
//!     generate(&ctx, &Arc::new(config), runner, dns, GenerateOptions::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod apply;
pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod fanout;
pub mod fsutil;
pub mod gen;
pub mod git;
pub mod gitops;
pub mod kubectl;
pub mod params;
pub mod poll;
pub mod provider;
pub mod waiter;

pub use cluster::{ClusterInfo, ClusterNumber};
pub use config::Config;
pub use context::RunContext;
pub use error::{Error, Result};
pub use exec::{Command, CommandRunner, SystemRunner};
pub use provider::{CloudProvider, DnsProvider, ProviderRegistry};

//! Manifest generation.
//!
//! `gen` materializes every chart in the cache once, then renders each chart
//! for each cluster into `clusters/NN/<chart>.yaml`.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::context::RunContext;
use crate::error::Result;
use crate::exec::CommandRunner;
use crate::fanout::for_each_cluster;
use crate::params::Parameters;
use crate::provider::DnsProvider;

pub mod chart;
pub mod manifest;
mod pipeline;

pub use chart::{ChartData, ChartFile};
pub use pipeline::{
    generate_chart, HelmTemplateProcessor, Pipeline, Processor, UnescapeProcessor, ValuesProcessor,
};

/// Options of the `gen` command.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    /// Only render the built-in charts.
    pub skip_local_charts: bool,
}

/// Prepare all charts and render them for every cluster.
///
/// # Errors
///
/// Returns an error if a chart cannot be prepared, or
/// [`Error::ClustersFailed`](crate::Error::ClustersFailed) if rendering
/// failed for any cluster.
pub async fn generate(
    ctx: &RunContext,
    config: &Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    dns: Arc<dyn DnsProvider>,
    opts: GenerateOptions,
) -> Result<()> {
    let mut charts = chart::setup_builtin_charts(ctx, runner.as_ref()).await?;
    if opts.skip_local_charts {
        info!("Skipping local charts");
    } else {
        for name in chart::local_chart_names(ctx)? {
            if charts.iter().any(|c| c.name == name) {
                info!(chart = %name, "Local chart shadows built-in chart");
                charts.retain(|c| c.name != name);
            }
            charts.push(chart::setup_chart_cache(ctx, runner.as_ref(), &name).await?);
        }
    }
    info!(
        charts = ?charts.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        clusters = config.clusters,
        "Rendering charts"
    );
    let charts = Arc::new(charts);

    for_each_cluster(ctx, config, |ctx, info| {
        let charts = Arc::clone(&charts);
        let runner = Arc::clone(&runner);
        let dns = Arc::clone(&dns);
        async move {
            // one Parameters per cluster so every chart sees the same password
            let params = Parameters::from_cluster(&info)?;
            for chart in charts.iter() {
                let pipeline = Pipeline::for_chart(
                    Arc::clone(&runner),
                    &chart.namespace()?,
                    dns.values_processors(),
                    dns.chart_processors(),
                );
                generate_chart(&ctx, chart, &info, &params, &pipeline).await?;
            }
            Ok(())
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};
    use crate::provider::MockDnsProvider;

    #[tokio::test]
    async fn test_generate_renders_every_chart_for_every_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("charts/podinfo/templates")).unwrap();
        std::fs::write(
            dir.path().join("charts/podinfo/values-override.yaml"),
            "host: podinfo.{{ CLUSTER_DOMAIN }}\n",
        )
        .unwrap();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|c| c.program() == "helm" && c.get_args()[0] == "template")
            .times(4)
            .returning(|c| {
                let dir = c.get_current_dir().unwrap().display().to_string();
                let mut out = format!("# from {dir}\n").into_bytes();
                out.extend_from_slice(c.get_stdin().unwrap_or_default());
                Ok(CommandOutput::from_stdout(out))
            });

        let mut dns = MockDnsProvider::new();
        dns.expect_values_processors().returning(Vec::new);
        dns.expect_chart_processors().returning(Vec::new);

        let config = Arc::new(Config {
            name: "ws".into(),
            clusters: 2,
            root_domain: "workshop.example.com".into(),
            cluster_login: crate::config::ClusterLogin {
                username: "workshopctl".into(),
                common_password: "secret".into(),
                unique_passwords: false,
            },
            ..Config::default()
        });

        generate(
            &ctx,
            &config,
            Arc::new(runner),
            Arc::new(dns),
            GenerateOptions::default(),
        )
        .await
        .unwrap();

        for n in ["01", "02"] {
            let cluster_dir = dir.path().join("clusters").join(n);
            assert!(cluster_dir.join("core-workshop-infra.yaml").exists());
            let podinfo = std::fs::read_to_string(cluster_dir.join("podinfo.yaml")).unwrap();
            assert!(podinfo.contains(&format!("host: podinfo.cluster-{n}.workshop.example.com")));
        }
    }

    #[tokio::test]
    async fn test_skip_local_charts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("charts/podinfo")).unwrap();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_| Ok(CommandOutput::from_stdout("kind: List\n")));
        let mut dns = MockDnsProvider::new();
        dns.expect_values_processors().returning(Vec::new);
        dns.expect_chart_processors().returning(Vec::new);
        let config = Arc::new(Config {
            clusters: 1,
            root_domain: "workshop.example.com".into(),
            ..Config::default()
        });

        generate(
            &ctx,
            &config,
            Arc::new(runner),
            Arc::new(dns),
            GenerateOptions {
                skip_local_charts: true,
            },
        )
        .await
        .unwrap();
        assert!(!dir.path().join("clusters/01/podinfo.yaml").exists());
    }
}

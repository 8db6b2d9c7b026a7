//! Chart cache preparation.
//!
//! Every chart, built-in or local, is materialized under `.cache/<chart>/`.
//! Known chart files are copied from the source tree when present; a file
//! that only exists in the cache is still registered. Charts with an
//! `external-chart` pointer are fetched with `helm`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::exec::{Command, CommandRunner};
use crate::fsutil;

/// Directory of local chart sources, relative to the root directory.
pub const CHARTS_DIR: &str = "charts";

/// Chart cache directory, relative to the root directory.
pub const CACHE_DIR: &str = ".cache";

/// Files a chart directory may contain that the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChartFile {
    Templates,
    ChartYaml,
    ValuesYaml,
    ValuesOverride,
    Namespace,
    ExternalChart,
    PipeJs,
    ValuesJs,
}

impl ChartFile {
    pub const ALL: [Self; 8] = [
        Self::Templates,
        Self::ChartYaml,
        Self::ValuesYaml,
        Self::ValuesOverride,
        Self::Namespace,
        Self::ExternalChart,
        Self::PipeJs,
        Self::ValuesJs,
    ];

    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Templates => "templates",
            Self::ChartYaml => "Chart.yaml",
            Self::ValuesYaml => "values.yaml",
            Self::ValuesOverride => "values-override.yaml",
            Self::Namespace => "namespace",
            Self::ExternalChart => "external-chart",
            Self::PipeJs => "pipe.js",
            Self::ValuesJs => "values.js",
        }
    }
}

/// One chart's cache location and the known files found for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartData {
    pub name: String,
    pub cache_dir: PathBuf,
    pub files: BTreeMap<ChartFile, PathBuf>,
}

impl ChartData {
    #[must_use]
    pub fn file(&self, file: ChartFile) -> Option<&Path> {
        self.files.get(&file).map(PathBuf::as_path)
    }

    /// Namespace the chart is rendered into, `default` unless overridden.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace file cannot be read.
    pub fn namespace(&self) -> Result<String> {
        match self.file(ChartFile::Namespace) {
            Some(path) => {
                let ns = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
                let ns = ns.trim();
                Ok(if ns.is_empty() { "default" } else { ns }.to_string())
            }
            None => Ok("default".to_string()),
        }
    }
}

/// A built-in chart shipped inside the binary.
struct BuiltinChart {
    name: &'static str,
    files: &'static [(&'static str, &'static str)],
}

const BUILTIN_CHARTS: &[BuiltinChart] = &[BuiltinChart {
    name: "core-workshop-infra",
    files: &[
        (
            "Chart.yaml",
            include_str!("../../charts/core-workshop-infra/Chart.yaml"),
        ),
        (
            "namespace",
            include_str!("../../charts/core-workshop-infra/namespace"),
        ),
        (
            "values.yaml",
            include_str!("../../charts/core-workshop-infra/values.yaml"),
        ),
        (
            "templates/traefik.yaml",
            include_str!("../../charts/core-workshop-infra/templates/traefik.yaml"),
        ),
        (
            "templates/external-dns.yaml",
            include_str!("../../charts/core-workshop-infra/templates/external-dns.yaml"),
        ),
    ],
}];

/// Names of the built-in charts.
#[must_use]
pub fn builtin_chart_names() -> Vec<&'static str> {
    BUILTIN_CHARTS.iter().map(|c| c.name).collect()
}

/// Restore the built-in charts into the cache and prepare each of them.
///
/// # Errors
///
/// Returns an error if a file cannot be written or a chart cannot be
/// prepared.
pub async fn setup_builtin_charts(
    ctx: &RunContext,
    runner: &dyn CommandRunner,
) -> Result<Vec<ChartData>> {
    let mut charts = Vec::with_capacity(BUILTIN_CHARTS.len());
    for chart in BUILTIN_CHARTS {
        let dir = ctx.join(&[CACHE_DIR, chart.name]);
        for (rel, contents) in chart.files {
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            std::fs::write(&path, contents).map_err(|e| Error::io(&path, e))?;
        }
        debug!(chart = chart.name, "Restored built-in chart");
        charts.push(setup_chart_cache(ctx, runner, chart.name).await?);
    }
    Ok(charts)
}

/// Names of every chart directory under `charts/`.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be listed.
pub fn local_chart_names(ctx: &RunContext) -> Result<Vec<String>> {
    let dir = ctx.join(&[CHARTS_DIR]);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(&dir, e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(&dir, e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Prepare `.cache/<name>` from `charts/<name>`.
///
/// # Errors
///
/// Returns an error if files cannot be copied or an external chart cannot
/// be fetched.
pub async fn setup_chart_cache(
    ctx: &RunContext,
    runner: &dyn CommandRunner,
    name: &str,
) -> Result<ChartData> {
    let cache_dir = ctx.join(&[CACHE_DIR, name]);
    std::fs::create_dir_all(&cache_dir).map_err(|e| Error::io(&cache_dir, e))?;
    let source_dir = ctx.join(&[CHARTS_DIR, name]);

    let mut files = BTreeMap::new();
    for file in ChartFile::ALL {
        let from = source_dir.join(file.file_name());
        let to = cache_dir.join(file.file_name());
        if from.exists() {
            fsutil::copy_path(&from, &to)?;
        } else if !to.exists() {
            continue;
        }
        files.insert(file, to);
    }

    if let Some(pointer) = files.get(&ChartFile::ExternalChart) {
        let reference = std::fs::read_to_string(pointer).map_err(|e| Error::io(pointer, e))?;
        fetch_external_chart(ctx, runner, reference.trim()).await?;
    }

    Ok(ChartData {
        name: name.to_string(),
        cache_dir,
        files,
    })
}

/// A resolved `external-chart` pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalChart {
    /// `<repo>/<chart>` as understood by `helm fetch`.
    pub reference: String,
    /// Repository to register first: (name, url).
    pub repo: Option<(String, String)>,
}

impl ExternalChart {
    /// Parse `repo/chart` or `https://host/path/chart`.
    ///
    /// A URL's host becomes the repository name with dots replaced by
    /// dashes; its last path segment is the chart.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for anything else.
    pub fn parse(pointer: &str) -> Result<Self> {
        if let Ok(mut url) = url::Url::parse(pointer) {
            let host = url.host_str().unwrap_or_default().to_string();
            let chart = url
                .path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
                .filter(|s| !s.is_empty() && !host.is_empty());
            let Some(chart) = chart else {
                return Err(Error::config(format!(
                    "invalid external chart URL {pointer:?}: expected <repo-url>/<name>"
                )));
            };
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop();
            }
            let repo_name = host.replace('.', "-");
            return Ok(Self {
                reference: format!("{repo_name}/{chart}"),
                repo: Some((repo_name, url.to_string())),
            });
        }

        let parts: Vec<&str> = pointer.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(Error::config(format!(
                "invalid external chart {pointer:?}: expected <repo>/<name> or <repo-url>/<name>"
            )));
        }
        Ok(Self {
            reference: pointer.to_string(),
            repo: None,
        })
    }
}

async fn fetch_external_chart(
    ctx: &RunContext,
    runner: &dyn CommandRunner,
    pointer: &str,
) -> Result<()> {
    let chart = ExternalChart::parse(pointer)?;

    if let Some((name, url)) = &chart.repo {
        let out = runner.run(&Command::new("helm").args(["repo", "list"])).await?;
        if out.combined().contains(name.as_str()) {
            debug!(repo = %name, "Helm repo already registered");
        } else {
            info!(repo = %name, url = %url, "Adding helm repo");
            runner
                .run(&Command::new("helm").args(["repo", "add", name, url]))
                .await?;
        }
    }

    info!(chart = %chart.reference, "Fetching external chart");
    let cache_root = ctx.join(&[CACHE_DIR]);
    runner
        .run(
            &Command::new("helm")
                .args(["fetch", &chart.reference, "--untar", "--untardir"])
                .arg(cache_root.display().to_string()),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;

    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};

    #[test]
    fn test_external_chart_url() {
        let chart = ExternalChart::parse("https://charts.fluxcd.io/flux").unwrap();
        assert_eq!(chart.reference, "charts-fluxcd-io/flux");
        let (name, url) = chart.repo.unwrap();
        assert_eq!(name, "charts-fluxcd-io");
        assert_eq!(url, "https://charts.fluxcd.io/");
    }

    #[test]
    fn test_external_chart_bare_reference() {
        let chart = ExternalChart::parse("stable/kubernetes-dashboard").unwrap();
        assert_eq!(chart.reference, "stable/kubernetes-dashboard");
        assert!(chart.repo.is_none());
        assert!(ExternalChart::parse("just-a-name").is_err());
        assert!(ExternalChart::parse("a/b/c").is_err());
    }

    #[tokio::test]
    async fn test_setup_copies_known_files_and_registers_cached() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();
        let src = dir.path().join("charts/demo");
        std::fs::create_dir_all(src.join("templates")).unwrap();
        std::fs::write(src.join("templates/cm.yaml"), "kind: ConfigMap\n").unwrap();
        std::fs::write(src.join("Chart.yaml"), "name: demo\n").unwrap();
        std::fs::write(src.join("unrelated.txt"), "skip me").unwrap();
        // present only in the cache from an earlier run
        let cache = dir.path().join(".cache/demo");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join("namespace"), "monitoring\n").unwrap();

        let runner = MockCommandRunner::new();
        let chart = setup_chart_cache(&ctx, &runner, "demo").await.unwrap();

        assert_eq!(chart.cache_dir, cache);
        assert!(chart.file(ChartFile::Templates).is_some());
        assert!(chart.file(ChartFile::ChartYaml).is_some());
        assert!(chart.file(ChartFile::ValuesYaml).is_none());
        assert_eq!(chart.namespace().unwrap(), "monitoring");
        assert!(cache.join("templates/cm.yaml").exists());
        assert!(!cache.join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn test_external_chart_adds_repo_once_and_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();
        let src = dir.path().join("charts/flux");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("external-chart"), "https://charts.fluxcd.io/flux\n").unwrap();

        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        runner
            .expect_run()
            .withf(|c| c.get_args().join(" ") == "repo list")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::from_stdout("NAME\tURL\nstable\thttps://x\n")));
        runner
            .expect_run()
            .withf(|c| c.get_args().join(" ") == "repo add charts-fluxcd-io https://charts.fluxcd.io/")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::default()));
        runner
            .expect_run()
            .withf(|c| c.get_args().starts_with(&["fetch".to_string(), "charts-fluxcd-io/flux".to_string()]))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::default()));

        let chart = setup_chart_cache(&ctx, &runner, "flux").await.unwrap();
        assert!(chart.file(ChartFile::ExternalChart).is_some());
        assert_eq!(chart.namespace().unwrap(), "default");
    }

    #[test]
    fn test_local_chart_names_sorted_dirs_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();
        assert!(local_chart_names(&ctx).unwrap().is_empty());
        std::fs::create_dir_all(dir.path().join("charts/b")).unwrap();
        std::fs::create_dir_all(dir.path().join("charts/a")).unwrap();
        std::fs::write(dir.path().join("charts/README.md"), "").unwrap();
        assert_eq!(local_chart_names(&ctx).unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_builtin_charts_are_restored() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();
        let runner = MockCommandRunner::new();
        let charts = setup_builtin_charts(&ctx, &runner).await.unwrap();
        assert_eq!(charts.len(), 1);
        assert_eq!(charts[0].name, "core-workshop-infra");
        assert_eq!(charts[0].namespace().unwrap(), "workshopctl");
        assert!(charts[0].file(ChartFile::Templates).is_some());
    }
}

//! The per-chart rendering pipeline.
//!
//! Rendering a chart for one cluster runs an ordered chain of processors.
//! Each processor takes ownership of the complete current buffer and
//! returns a new complete buffer, which becomes the next processor's input.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use handlebars::Handlebars;
use tracing::{debug, info, trace, Instrument};

use super::chart::{ChartData, ChartFile};
use crate::cluster::ClusterInfo;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::exec::{Command, CommandRunner};
use crate::fsutil;
use crate::params::Parameters;

/// One content transformation step.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Transform the full `input` into a full output.
    async fn process(
        &self,
        chart: &ChartData,
        params: &Parameters,
        input: Vec<u8>,
    ) -> Result<Vec<u8>>;
}

/// Templates the values text with the parameters and appends their YAML.
#[derive(Debug, Default)]
pub struct ValuesProcessor;

#[async_trait]
impl Processor for ValuesProcessor {
    fn name(&self) -> &'static str {
        "values"
    }

    async fn process(
        &self,
        _chart: &ChartData,
        params: &Parameters,
        input: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let text = String::from_utf8_lossy(&input);
        let mut hb = Handlebars::new();
        hb.register_escape_fn(handlebars::no_escape);
        let mut out = hb.render_template(&text, &params.template_data()?)?;
        out.push('\n');
        out.push_str(&params.to_yaml()?);
        Ok(out.into_bytes())
    }
}

/// Runs `helm template` in the chart's cache directory with the
/// accumulated values on stdin.
pub struct HelmTemplateProcessor {
    runner: Arc<dyn CommandRunner>,
    namespace: String,
}

impl fmt::Debug for HelmTemplateProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelmTemplateProcessor")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl HelmTemplateProcessor {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, namespace: impl Into<String>) -> Self {
        Self {
            runner,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl Processor for HelmTemplateProcessor {
    fn name(&self) -> &'static str {
        "helm-template"
    }

    async fn process(
        &self,
        chart: &ChartData,
        _params: &Parameters,
        input: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let cmd = Command::new("helm")
            .args(["template", "-n", &self.namespace, "workshopctl", ".", "-f", "-"])
            .current_dir(&chart.cache_dir)
            .stdin(input);
        Ok(self.runner.run(&cmd).await?.stdout)
    }
}

/// Turns `\{` and `\}` left over from templating into plain braces.
#[derive(Debug, Default)]
pub struct UnescapeProcessor;

#[async_trait]
impl Processor for UnescapeProcessor {
    fn name(&self) -> &'static str {
        "unescape"
    }

    async fn process(
        &self,
        _chart: &ChartData,
        _params: &Parameters,
        input: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len());
        let mut bytes = input.into_iter().peekable();
        while let Some(b) = bytes.next() {
            if b == b'\\' && matches!(bytes.peek(), Some(b'{' | b'}')) {
                continue;
            }
            out.push(b);
        }
        Ok(out)
    }
}

/// An ordered processor chain.
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn Processor>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|s| s.name()))
            .finish()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(steps: Vec<Arc<dyn Processor>>) -> Self {
        Self { steps }
    }

    /// `values`, then DNS values processors, then `helm template`, then
    /// unescaping, then DNS chart processors.
    #[must_use]
    pub fn for_chart(
        runner: Arc<dyn CommandRunner>,
        namespace: &str,
        values_processors: Vec<Arc<dyn Processor>>,
        chart_processors: Vec<Arc<dyn Processor>>,
    ) -> Self {
        let mut steps: Vec<Arc<dyn Processor>> = vec![Arc::new(ValuesProcessor)];
        steps.extend(values_processors);
        steps.push(Arc::new(HelmTemplateProcessor::new(runner, namespace)));
        steps.push(Arc::new(UnescapeProcessor));
        steps.extend(chart_processors);
        Self { steps }
    }

    #[must_use]
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order, starting from `initial`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Processor`] naming the first step that failed.
    pub async fn run(
        &self,
        chart: &ChartData,
        params: &Parameters,
        initial: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let mut buf = initial;
        for step in &self.steps {
            trace!(processor = step.name(), input = %String::from_utf8_lossy(&buf), "Before processor");
            buf = step
                .process(chart, params, buf)
                .await
                .map_err(|e| Error::Processor {
                    processor: step.name(),
                    chart: chart.name.clone(),
                    source: Box::new(e),
                })?;
        }
        Ok(buf)
    }
}

/// Render `chart` for one cluster and write `clusters/NN/<chart>.yaml`.
///
/// # Errors
///
/// Returns an error if the chart's files cannot be read, a processor
/// fails, or the output cannot be written.
pub async fn generate_chart(
    ctx: &RunContext,
    chart: &ChartData,
    info: &ClusterInfo,
    params: &Parameters,
    pipeline: &Pipeline,
) -> Result<()> {
    let span = tracing::debug_span!("chart", chart = %chart.name);
    async {
        info!(chart = %chart.name, "Generating chart");

        let initial = match chart.file(ChartFile::ValuesOverride) {
            Some(path) => std::fs::read(path).map_err(|e| Error::io(path, e))?,
            None => Vec::new(),
        };

        let output = pipeline.run(chart, params, initial).await?;

        let path = ctx
            .join(&[info.index().cluster_dir()])
            .join(format!("{}.yaml", chart.name));
        debug!(path = %path.display(), "Writing rendered chart");
        fsutil::write_file(ctx, &path, &output)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;
    use crate::params;

    fn chart(dir: PathBuf) -> ChartData {
        ChartData {
            name: "demo".into(),
            cache_dir: dir,
            files: BTreeMap::new(),
        }
    }

    /// Deterministic stand-in for `helm template`.
    struct EchoTemplate;

    #[async_trait]
    impl Processor for EchoTemplate {
        fn name(&self) -> &'static str {
            "echo-template"
        }

        async fn process(
            &self,
            _chart: &ChartData,
            params: &Parameters,
            mut input: Vec<u8>,
        ) -> Result<Vec<u8>> {
            input.extend_from_slice(b"---\n");
            input.extend_from_slice(params.to_yaml()?.as_bytes());
            Ok(input)
        }
    }

    struct Failing;

    #[async_trait]
    impl Processor for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn process(&self, _: &ChartData, _: &Parameters, _: Vec<u8>) -> Result<Vec<u8>> {
            Err(Error::provider("boom"))
        }
    }

    #[tokio::test]
    async fn test_values_processor_templates_and_appends() {
        let params = params::tests::sample();
        let out = ValuesProcessor
            .process(
                &chart(PathBuf::from("/tmp")),
                &params,
                b"domain: {{ CLUSTER_DOMAIN }}\nmail: {{ workshopctl.LETSENCRYPT_EMAIL }}\nauth: \"{{CLUSTER_BASIC_AUTH_BCRYPT}}\"".to_vec(),
            )
            .await
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("domain: cluster-01.workshop.example.com\nmail: ops@example.com\n"));
        assert!(out.contains("auth: \"workshopctl:$2b$12$hash\"\n"));
        assert!(out.contains("\nworkshopctl:\n  CLOUD_PROVIDER: digitalocean\n"));
    }

    #[tokio::test]
    async fn test_values_processor_on_empty_input() {
        let params = params::tests::sample();
        let out = ValuesProcessor
            .process(&chart(PathBuf::from("/tmp")), &params, Vec::new())
            .await
            .unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("\nworkshopctl:\n"));
    }

    #[tokio::test]
    async fn test_unescape() {
        let params = params::tests::sample();
        let out = UnescapeProcessor
            .process(
                &chart(PathBuf::from("/tmp")),
                &params,
                br"tmpl: \{\{ .Values.x \}\} keep \n".to_vec(),
            )
            .await
            .unwrap();
        assert_eq!(out, br"tmpl: {{ .Values.x }} keep \n".to_vec());
    }

    #[test]
    fn test_chain_order() {
        let runner: Arc<dyn CommandRunner> = Arc::new(crate::exec::MockCommandRunner::new());
        let pipeline = Pipeline::for_chart(runner, "workshopctl", vec![], vec![Arc::new(Failing)]);
        assert_eq!(
            pipeline.step_names(),
            vec!["values", "helm-template", "unescape", "failing"]
        );
    }

    #[tokio::test]
    async fn test_helm_template_invocation() {
        let mut runner = crate::exec::MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| {
                cmd.program() == "helm"
                    && cmd.get_args().join(" ") == "template -n workshopctl workshopctl . -f -"
                    && cmd.get_current_dir() == Some(std::path::Path::new("/cache/demo"))
                    && cmd.get_stdin() == Some(b"values".as_slice())
            })
            .times(1)
            .returning(|_| Ok(crate::exec::CommandOutput::from_stdout("rendered")));
        let p = HelmTemplateProcessor::new(Arc::new(runner), "workshopctl");
        let out = p
            .process(&chart(PathBuf::from("/cache/demo")), &params::tests::sample(), b"values".to_vec())
            .await
            .unwrap();
        assert_eq!(out, b"rendered");
    }

    #[tokio::test]
    async fn test_rendering_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let values = dir.path().join("values-override.yaml");
        std::fs::write(&values, "replicas: 2\nhost: \\{\\{ {{ ROOT_DOMAIN }} \\}\\}\n").unwrap();
        let mut files = BTreeMap::new();
        files.insert(ChartFile::ValuesOverride, values);
        let chart = ChartData {
            name: "demo".into(),
            cache_dir: dir.path().to_path_buf(),
            files,
        };
        let params = params::tests::sample();
        let pipeline = Pipeline::new(vec![
            Arc::new(ValuesProcessor),
            Arc::new(EchoTemplate),
            Arc::new(UnescapeProcessor),
        ]);

        let initial = std::fs::read(chart.file(ChartFile::ValuesOverride).unwrap()).unwrap();
        let first = pipeline.run(&chart, &params, initial.clone()).await.unwrap();
        let second = pipeline.run(&chart, &params, initial).await.unwrap();
        assert_eq!(first, second);
        let text = String::from_utf8(first).unwrap();
        assert!(text.contains("host: {{ workshop.example.com }}"));
    }

    #[tokio::test]
    async fn test_failure_names_processor_and_chart() {
        let pipeline = Pipeline::new(vec![Arc::new(UnescapeProcessor), Arc::new(Failing)]);
        let err = pipeline
            .run(&chart(PathBuf::from("/tmp")), &params::tests::sample(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Processor { processor: "failing", .. }));
        assert!(err.to_string().contains("chart demo"));
    }

    #[tokio::test]
    async fn test_generate_chart_writes_cluster_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(false, dir.path()).unwrap();
        let cfg = std::sync::Arc::new(crate::config::Config {
            root_domain: "workshop.example.com".into(),
            ..Default::default()
        });
        let info = ClusterInfo::new(cfg, crate::cluster::ClusterNumber::new(2));
        let pipeline = Pipeline::new(vec![Arc::new(EchoTemplate)]);

        generate_chart(&ctx, &chart(dir.path().join(".cache/demo")), &info, &params::tests::sample(), &pipeline)
            .await
            .unwrap();
        let written = std::fs::read_to_string(dir.path().join("clusters/02/demo.yaml")).unwrap();
        assert!(written.starts_with("---\nworkshopctl:\n"));
    }
}

//! Explicit execution context passed into every component.
//!
//! A [`RunContext`] carries the dry-run flag, the absolute root directory all
//! relative paths are resolved against, and (inside a per-cluster task) the
//! cluster index together with the tracing span that tags log lines with it.

use std::path::{Path, PathBuf};

use tracing::Span;

use crate::cluster::ClusterNumber;
use crate::error::{Error, Result};

/// Execution context for one run (or one cluster's part of a run).
#[derive(Debug, Clone)]
pub struct RunContext {
    dry_run: bool,
    root_dir: PathBuf,
    cluster: Option<ClusterNumber>,
    span: Span,
}

impl RunContext {
    /// Create a context rooted at `root_dir`, made absolute against the
    /// current working directory when relative.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory cannot be determined.
    pub fn new(dry_run: bool, root_dir: impl AsRef<Path>) -> Result<Self> {
        let root_dir = root_dir.as_ref();
        let root_dir = if root_dir.is_absolute() {
            root_dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| Error::io(".", e))?
                .join(root_dir)
        };
        Ok(Self {
            dry_run,
            root_dir,
            cluster: None,
            span: Span::current(),
        })
    }

    /// Derive the context for one cluster's workflow.
    #[must_use]
    pub fn for_cluster(&self, index: ClusterNumber) -> Self {
        Self {
            dry_run: self.dry_run,
            root_dir: self.root_dir.clone(),
            cluster: Some(index),
            span: tracing::info_span!("cluster", cluster = %index),
        }
    }

    /// Same context with a different dry-run setting.
    #[must_use]
    pub fn with_dry_run(&self, dry_run: bool) -> Self {
        Self {
            dry_run,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Cluster this context is scoped to, if any.
    #[must_use]
    pub fn cluster(&self) -> Option<ClusterNumber> {
        self.cluster
    }

    /// Span that per-cluster futures are instrumented with.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Join path components onto the root directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, parts: &[P]) -> PathBuf {
        parts
            .iter()
            .fold(self.root_dir.clone(), |acc, p| acc.join(p))
    }
}

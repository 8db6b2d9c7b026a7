//! Error types for workshop fleet operations.

use thiserror::Error;

use crate::exec::CommandError;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while generating, applying or cleaning up clusters.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The configuration is incomplete or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A provider name was not found in the registry.
    #[error("{kind} provider {name:?} not supported")]
    UnknownProvider { kind: &'static str, name: String },

    /// An external command failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A required external binary is not installed.
    #[error("required binary {0:?} not found in PATH")]
    MissingBinary(String),

    /// A polling operation ran out of time.
    #[error("timed out after {0:?} waiting for the condition")]
    PollTimeout(std::time::Duration),

    /// A polling condition reported an unrecoverable failure.
    #[error("polling aborted: {0}")]
    PollAborted(Box<Error>),

    /// A readiness check failed.
    #[error("waiting for {check} failed with: {source}")]
    Check {
        check: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Cloud or DNS provider failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// The provider API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// One or more per-cluster workflows failed; details were logged.
    #[error("one or more clusters failed")]
    ClustersFailed,

    /// A processor in the manifest pipeline failed.
    #[error("processor {processor} failed for chart {chart}: {source}")]
    Processor {
        processor: &'static str,
        chart: String,
        #[source]
        source: Box<Error>,
    },

    /// Filesystem error.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Values template rendering error.
    #[error("template error: {0}")]
    Template(#[from] handlebars::RenderError),

    /// Password hashing error.
    #[error("bcrypt error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    /// DNS lookup error.
    #[error("DNS lookup for {domain:?} failed: {message}")]
    Lookup { domain: String, message: String },
}

impl Error {
    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider error with the given message.
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

//! Per-cluster parameters shared by the bootstrap secret and chart values.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::cluster::ClusterInfo;
use crate::error::{Error, Result};

/// Maps a DNS provider name to the provider name external-dns expects.
#[must_use]
pub fn external_dns_provider(dns_provider: &str) -> &'static str {
    match dns_provider {
        "digitalocean" => "digitalocean",
        "gke" => "google",
        "scaleway" => "scaleway",
        "aws" => "aws",
        "cloudflare" => "cloudflare",
        _ => "",
    }
}

/// Maps a DNS provider name to Traefik's ACME DNS challenge provider name.
#[must_use]
pub fn traefik_dns_provider(dns_provider: &str) -> &'static str {
    match dns_provider {
        "digitalocean" => "digitalocean",
        "gke" => "gcloud",
        "scaleway" => "scaleway",
        "aws" => "route53",
        "cloudflare" => "cloudflare",
        _ => "",
    }
}

/// The fixed parameter keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkshopctlParameters {
    pub cloud_provider: String,
    pub cloud_provider_serviceaccount: String,
    pub external_dns_provider: String,
    pub traefik_dns_provider: String,
    pub dns_provider_serviceaccount: String,
    pub root_domain: String,
    pub cluster_domain: String,
    pub git_repo: String,
    pub tutorials_repo: String,
    pub tutorials_dir: String,
    pub letsencrypt_email: String,
    pub cluster_password: String,
    pub cluster_basic_auth_bcrypt: String,
}

/// Flattened key/value bag for one cluster.
///
/// Serializes as `workshopctl: { KEY: value, ... }`, which is the block
/// appended to every chart's values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameters {
    workshopctl: WorkshopctlParameters,
    #[serde(skip)]
    cloud_specific: BTreeMap<String, String>,
    #[serde(skip)]
    dns_specific: BTreeMap<String, String>,
}

impl Parameters {
    /// Build the parameters for one cluster.
    ///
    /// The basic-auth hash is salted, so two calls give different values;
    /// build once and share the result where output must be stable.
    ///
    /// # Errors
    ///
    /// Returns an error if the basic-auth hash cannot be computed.
    pub fn from_cluster(info: &ClusterInfo) -> Result<Self> {
        let cfg = info.config();
        Ok(Self {
            workshopctl: WorkshopctlParameters {
                cloud_provider: cfg.cloud_provider.name.clone(),
                cloud_provider_serviceaccount: cfg.cloud_provider.service_account_content.clone(),
                external_dns_provider: external_dns_provider(&cfg.dns_provider.name).to_string(),
                traefik_dns_provider: traefik_dns_provider(&cfg.dns_provider.name).to_string(),
                dns_provider_serviceaccount: cfg.dns_provider.service_account_content.clone(),
                root_domain: cfg.root_domain.clone(),
                cluster_domain: info.domain(),
                git_repo: cfg.git.repo.clone(),
                tutorials_repo: cfg.tutorials.repo.clone(),
                tutorials_dir: cfg.tutorials.dir.clone(),
                letsencrypt_email: cfg.lets_encrypt_email.clone(),
                cluster_password: info.password().to_string(),
                cluster_basic_auth_bcrypt: info.basic_auth()?,
            },
            cloud_specific: cfg.cloud_provider.provider_specific.clone(),
            dns_specific: cfg.dns_provider.provider_specific.clone(),
        })
    }

    /// Build directly from parts.
    #[must_use]
    pub fn new(
        workshopctl: WorkshopctlParameters,
        cloud_specific: BTreeMap<String, String>,
        dns_specific: BTreeMap<String, String>,
    ) -> Self {
        Self {
            workshopctl,
            cloud_specific,
            dns_specific,
        }
    }

    #[must_use]
    pub fn fixed(&self) -> &WorkshopctlParameters {
        &self.workshopctl
    }

    /// Flatten into one ordered map.
    ///
    /// Provider-specific keys are layered over the fixed keys, cloud first and
    /// DNS last, so on a conflict the DNS provider's value wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the fixed keys cannot be serialized.
    pub fn to_map(&self) -> Result<BTreeMap<String, String>> {
        let Value::Object(fixed) = serde_json::to_value(&self.workshopctl)? else {
            return Err(Error::config("parameters did not serialize to a map"));
        };
        let mut map: BTreeMap<String, String> = fixed
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();
        map.extend(self.cloud_specific.clone());
        map.extend(self.dns_specific.clone());
        Ok(map)
    }

    /// Template context for values files: every flattened key at the top
    /// level and again under `workshopctl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be serialized.
    pub fn template_data(&self) -> Result<Value> {
        let map = self.to_map()?;
        let mut data = serde_json::to_value(&map)?;
        if let Value::Object(obj) = &mut data {
            obj.insert("workshopctl".to_string(), serde_json::to_value(&map)?);
        }
        Ok(data)
    }

    /// YAML form appended to chart values.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

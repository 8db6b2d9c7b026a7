//! `DigitalOcean` cloud and DNS provider.
//!
//! ## Overview
//!
//! Clusters are DOKS managed Kubernetes clusters with a single node pool.
//! The root domain is a `DigitalOcean` DNS zone; records inside it are
//! created by external-dns running in each cluster and removed again by
//! [`DnsProvider::cleanup_records`].
//!
//! ## Provider-specific settings
//!
//! - **region**: datacenter slug, defaults to `fra1`

use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};

use super::{CloudProvider, DnsProvider};

mod client;
mod cloud;
mod dns;
mod models;
mod processors;

pub use client::{DigitalOceanClient, API_BASE_URL};
pub use cloud::{choose_size, DigitalOceanCloud, FALLBACK_SIZE};
pub use dns::DigitalOceanDns;
pub use processors::DnsTokenProcessor;

/// Tag put on every resource workshopctl creates.
pub const WORKSHOPCTL_TAG: &str = "workshopctl";

pub const DEFAULT_REGION: &str = "fra1";
const REGION_KEY: &str = "region";

fn client_for(config: &ProviderConfig) -> Result<DigitalOceanClient> {
    if config.service_account_content.is_empty() {
        return Err(Error::config(format!(
            "DigitalOcean token at {:?} is empty",
            config.service_account_path
        )));
    }
    DigitalOceanClient::new(config.service_account_content.clone())
}

/// Registry constructor for the cloud side.
///
/// # Errors
///
/// Returns an error if no API token was configured.
pub fn new_cloud_provider(config: &ProviderConfig) -> Result<Arc<dyn CloudProvider>> {
    let region = config
        .provider_specific
        .get(REGION_KEY)
        .map_or(DEFAULT_REGION, String::as_str);
    Ok(Arc::new(DigitalOceanCloud::new(client_for(config)?, region)))
}

/// Registry constructor for the DNS side.
///
/// # Errors
///
/// Returns an error if no API token was configured.
pub fn new_dns_provider(config: &ProviderConfig, root_domain: &str) -> Result<Arc<dyn DnsProvider>> {
    Ok(Arc::new(DigitalOceanDns::new(client_for(config)?, root_domain)))
}

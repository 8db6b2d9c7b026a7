use std::collections::BTreeMap;
use std::sync::Arc;

use super::{digitalocean, CloudProvider, DnsProvider};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};

/// Builds a cloud provider from its configuration.
pub type CloudFactory = fn(&ProviderConfig) -> Result<Arc<dyn CloudProvider>>;

/// Builds a DNS provider from its configuration and the root domain.
pub type DnsFactory = fn(&ProviderConfig, &str) -> Result<Arc<dyn DnsProvider>>;

/// Name-keyed constructors for every supported provider.
#[derive(Clone)]
pub struct ProviderRegistry {
    cloud: BTreeMap<&'static str, CloudFactory>,
    dns: BTreeMap<&'static str, DnsFactory>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_cloud("digitalocean", digitalocean::new_cloud_provider);
        registry.register_dns("digitalocean", digitalocean::new_dns_provider);
        registry
    }
}

impl ProviderRegistry {
    /// A registry without any provider.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            cloud: BTreeMap::new(),
            dns: BTreeMap::new(),
        }
    }

    pub fn register_cloud(&mut self, name: &'static str, factory: CloudFactory) {
        self.cloud.insert(name, factory);
    }

    pub fn register_dns(&mut self, name: &'static str, factory: DnsFactory) {
        self.dns.insert(name, factory);
    }

    /// Instantiate the cloud provider named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProvider`] if the name is not registered.
    pub fn cloud(&self, config: &ProviderConfig) -> Result<Arc<dyn CloudProvider>> {
        let factory = self
            .cloud
            .get(config.name.as_str())
            .ok_or_else(|| Error::UnknownProvider {
                kind: "cloud",
                name: config.name.clone(),
            })?;
        factory(config)
    }

    /// Instantiate the DNS provider named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProvider`] if the name is not registered.
    pub fn dns(&self, config: &ProviderConfig, root_domain: &str) -> Result<Arc<dyn DnsProvider>> {
        let factory = self
            .dns
            .get(config.name.as_str())
            .ok_or_else(|| Error::UnknownProvider {
                kind: "DNS",
                name: config.name.clone(),
            })?;
        factory(config, root_domain)
    }
}

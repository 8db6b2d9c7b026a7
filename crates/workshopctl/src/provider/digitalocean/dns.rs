//! DNS zone and record management on `DigitalOcean`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::client::DigitalOceanClient;
use super::processors::DnsTokenProcessor;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::gen::Processor;
use crate::provider::{ClusterMeta, DnsProvider};

/// `DigitalOcean` implementation of [`DnsProvider`].
#[derive(Debug, Clone)]
pub struct DigitalOceanDns {
    client: DigitalOceanClient,
    root_domain: String,
}

impl DigitalOceanDns {
    #[must_use]
    pub fn new(client: DigitalOceanClient, root_domain: impl Into<String>) -> Self {
        Self {
            client,
            root_domain: root_domain.into(),
        }
    }
}

#[async_trait]
impl DnsProvider for DigitalOceanDns {
    async fn ensure_zone(&self, ctx: &RunContext) -> Result<()> {
        match self.client.get_domain(&self.root_domain).await {
            Ok(domain) => {
                debug!(domain = %domain.name, "DNS zone already exists");
                Ok(())
            }
            Err(Error::Api { status: 404, .. }) => {
                if ctx.is_dry_run() {
                    info!(domain = %self.root_domain, "Would create DNS zone");
                    return Ok(());
                }
                info!(domain = %self.root_domain, "Creating DNS zone");
                self.client.create_domain(&self.root_domain).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn cleanup_records(&self, ctx: &RunContext, meta: &ClusterMeta) -> Result<()> {
        let subdomain = meta.index.subdomain();
        let records = self.client.list_records(&self.root_domain).await?;

        let mut removed = 0usize;
        for record in records.iter().filter(|r| r.name.ends_with(&subdomain)) {
            if ctx.is_dry_run() {
                info!(record = %record.name, kind = %record.record_type, "Would delete DNS record");
                continue;
            }
            debug!(record = %record.name, kind = %record.record_type, data = %record.data, "Deleting DNS record");
            self.client.delete_record(&self.root_domain, record.id).await?;
            removed += 1;
        }
        info!(subdomain = %subdomain, removed, "Cleaned up DNS records");
        Ok(())
    }

    fn values_processors(&self) -> Vec<Arc<dyn Processor>> {
        Vec::new()
    }

    fn chart_processors(&self) -> Vec<Arc<dyn Processor>> {
        vec![Arc::new(DnsTokenProcessor)]
    }
}

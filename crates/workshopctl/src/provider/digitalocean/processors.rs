//! Manifest processors contributed by the `DigitalOcean` DNS provider.

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::gen::chart::ChartData;
use crate::gen::manifest::{append_container_env, patch_documents, secret_env_var, ResourceMatch};
use crate::gen::Processor;
use crate::kubectl::{WORKSHOPCTL_NAMESPACE, WORKSHOPCTL_SECRET};
use crate::params::Parameters;

/// Secret key holding the DNS provider token.
const DNS_TOKEN_KEY: &str = "DNS_PROVIDER_SERVICEACCOUNT";

/// (deployment, container, env var) triples that need the API token.
const TOKEN_CONSUMERS: [(&str, &str, &str); 2] = [
    ("traefik", "traefik", "DO_AUTH_TOKEN"),
    ("external-dns", "external-dns", "DO_TOKEN"),
];

/// Gives traefik and external-dns their `DigitalOcean` token from the
/// workshopctl secret.
#[derive(Debug, Default)]
pub struct DnsTokenProcessor;

#[async_trait]
impl Processor for DnsTokenProcessor {
    fn name(&self) -> &'static str {
        "digitalocean-dns-token"
    }

    async fn process(
        &self,
        _chart: &ChartData,
        _params: &Parameters,
        input: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let stream = String::from_utf8_lossy(&input);
        let out = patch_documents(&stream, |doc| {
            for (deployment, container, env) in TOKEN_CONSUMERS {
                let target = ResourceMatch {
                    kind: "Deployment",
                    name: deployment,
                    namespace: WORKSHOPCTL_NAMESPACE,
                };
                if target.matches(doc) {
                    let entry = secret_env_var(env, WORKSHOPCTL_SECRET, DNS_TOKEN_KEY);
                    let patched = append_container_env(doc, container, &entry);
                    if !patched {
                        warn!(
                            deployment,
                            container,
                            env,
                            "Deployment has no such container, DNS token not injected"
                        );
                    }
                    return Ok(patched);
                }
            }
            Ok(false)
        })?;
        Ok(out.into_bytes())
    }
}

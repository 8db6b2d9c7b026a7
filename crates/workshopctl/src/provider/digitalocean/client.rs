//! `DigitalOcean` REST client.
//!
//! API Documentation: <https://docs.digitalocean.com/reference/api/>

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::models::{
    ClusterListResponse, ClusterResponse, CreateClusterRequest, CreateDomainRequest, Domain,
    DomainRecord, DomainRecordListResponse, DomainResponse, KubernetesCluster, LoadBalancer,
    LoadBalancerListResponse,
};
use crate::error::{Error, Result};

/// Base URL for `DigitalOcean` API.
pub const API_BASE_URL: &str = "https://api.digitalocean.com/v2";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Page size for list calls; workshop accounts stay well below it.
const PER_PAGE: u32 = 200;

/// Thin authenticated client over the endpoints workshopctl needs.
#[derive(Clone)]
pub struct DigitalOceanClient {
    /// HTTP client.
    client: Client,
    /// API root, without trailing slash.
    base_url: String,
    /// API token for authentication.
    api_token: String,
}

impl std::fmt::Debug for DigitalOceanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitalOceanClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl DigitalOceanClient {
    /// Create a client against the public API.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_token, API_BASE_URL)
    }

    /// Create a client against a different API root.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn with_base_url(api_token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Make an authenticated GET request.
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated GET request returning the raw body.
    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url(path);
        debug!(url = %url, "GET request (raw)");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.bytes().await?.to_vec())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(Error::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Make an authenticated POST request.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let url = self.url(path);
        debug!(url = %url, "POST request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated DELETE request. A 404 counts as deleted.
    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        debug!(url = %url, "DELETE request");

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(Error::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                Error::Json(e)
            })
        } else {
            Err(Error::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    // ------------------------------------------------------------------
    // Kubernetes
    // ------------------------------------------------------------------

    pub async fn list_clusters(&self) -> Result<Vec<KubernetesCluster>> {
        let resp: ClusterListResponse = self
            .get(&format!("/kubernetes/clusters?per_page={PER_PAGE}"))
            .await?;
        Ok(resp.kubernetes_clusters)
    }

    /// Find a cluster by exact name.
    pub async fn find_cluster(&self, name: &str) -> Result<Option<KubernetesCluster>> {
        let clusters = self.list_clusters().await?;
        Ok(clusters.into_iter().find(|c| {
            if c.name != name {
                debug!(cluster = %c.name, wanted = %name, "Skipping cluster with other name");
            }
            c.name == name
        }))
    }

    pub async fn get_cluster(&self, id: &str) -> Result<KubernetesCluster> {
        let resp: ClusterResponse = self.get(&format!("/kubernetes/clusters/{id}")).await?;
        Ok(resp.kubernetes_cluster)
    }

    pub async fn create_cluster(&self, req: &CreateClusterRequest) -> Result<KubernetesCluster> {
        let resp: ClusterResponse = self.post("/kubernetes/clusters", req).await?;
        Ok(resp.kubernetes_cluster)
    }

    pub async fn delete_cluster(&self, id: &str) -> Result<()> {
        self.delete(&format!("/kubernetes/clusters/{id}")).await
    }

    /// Download the admin kubeconfig of a cluster.
    pub async fn kubeconfig(&self, id: &str) -> Result<Vec<u8>> {
        self.get_bytes(&format!("/kubernetes/clusters/{id}/kubeconfig"))
            .await
    }

    // ------------------------------------------------------------------
    // Load balancers
    // ------------------------------------------------------------------

    pub async fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>> {
        let resp: LoadBalancerListResponse = self
            .get(&format!("/load_balancers?per_page={PER_PAGE}"))
            .await?;
        Ok(resp.load_balancers)
    }

    pub async fn delete_load_balancer(&self, id: &str) -> Result<()> {
        self.delete(&format!("/load_balancers/{id}")).await
    }

    // ------------------------------------------------------------------
    // Domains
    // ------------------------------------------------------------------

    pub async fn get_domain(&self, name: &str) -> Result<Domain> {
        let resp: DomainResponse = self.get(&format!("/domains/{name}")).await?;
        Ok(resp.domain)
    }

    pub async fn create_domain(&self, name: &str) -> Result<Domain> {
        let resp: DomainResponse = self
            .post(
                "/domains",
                &CreateDomainRequest {
                    name: name.to_string(),
                },
            )
            .await?;
        Ok(resp.domain)
    }

    pub async fn list_records(&self, domain: &str) -> Result<Vec<DomainRecord>> {
        let resp: DomainRecordListResponse = self
            .get(&format!("/domains/{domain}/records?per_page={PER_PAGE}"))
            .await?;
        Ok(resp.domain_records)
    }

    pub async fn delete_record(&self, domain: &str, id: i64) -> Result<()> {
        self.delete(&format!("/domains/{domain}/records/{id}")).await
    }
}

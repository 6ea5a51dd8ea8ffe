//! GCE Metadata Server
//!
//! Read-only lookups of instance attributes and the project id. On GKE nodes
//! the metadata server is reachable from every pod.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Default metadata host, overridable through `GCE_METADATA_HOST`
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

/// Source of instance metadata
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Value of an instance attribute such as `cluster-name`
    async fn instance_attribute(&self, key: &str) -> Result<String>;

    /// Project id the instance runs in
    async fn project_id(&self) -> Result<String>;
}

/// HTTP client for the GCE metadata server
pub struct GceMetadataClient {
    http_client: Client,
    base_url: String,
}

impl GceMetadataClient {
    /// Create a client for `host` (a bare host, `host:port`, or full URL)
    pub fn new(host: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };

        Ok(Self {
            http_client,
            base_url,
        })
    }

    async fn get(&self, suffix: &str) -> Result<String> {
        let url = format!("{}/computeMetadata/v1/{}", self.base_url, suffix);
        debug!(url = %url, "Querying metadata server");

        let response = self
            .http_client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .with_context(|| format!("Failed to reach metadata server at {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            bail!("Metadata server returned {} for {}", status, suffix);
        }

        let value = response
            .text()
            .await
            .context("Failed to read metadata response")?
            .trim()
            .to_string();

        if value.is_empty() {
            bail!("Metadata value {} is empty", suffix);
        }

        Ok(value)
    }
}

#[async_trait]
impl MetadataSource for GceMetadataClient {
    async fn instance_attribute(&self, key: &str) -> Result<String> {
        self.get(&format!(
            "instance/attributes/{}",
            urlencoding::encode(key)
        ))
        .await
    }

    async fn project_id(&self) -> Result<String> {
        self.get("project/project-id").await
    }
}

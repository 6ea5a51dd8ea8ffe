//! Google Cloud token APIs
//!
//! - STS `v1/token`: RFC 8693 exchange of the KSA token for a federated token
//! - IAM Credentials `generateIdToken`: Google-signed ID token for a GSA,
//!   authorized with the federated token

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_STS_ENDPOINT: &str = "https://sts.googleapis.com";
pub const DEFAULT_IAM_CREDENTIALS_ENDPOINT: &str = "https://iamcredentials.googleapis.com";

pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const TOKEN_TYPE_JWT: &str = "urn:ietf:params:oauth:token-type:jwt";
pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";
pub const IAM_SCOPE: &str = "https://www.googleapis.com/auth/iam";

/// STS token exchange request
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StsExchangeRequest {
    pub grant_type: String,
    pub audience: String,
    pub scope: String,
    pub requested_token_type: String,
    pub subject_token: String,
    pub subject_token_type: String,
}

impl StsExchangeRequest {
    /// Exchange a Kubernetes JWT for an access token with IAM scope
    pub fn for_kubernetes_token(subject_token: String, audience: String) -> Self {
        Self {
            grant_type: GRANT_TYPE_TOKEN_EXCHANGE.to_string(),
            audience,
            scope: IAM_SCOPE.to_string(),
            requested_token_type: TOKEN_TYPE_ACCESS_TOKEN.to_string(),
            subject_token,
            subject_token_type: TOKEN_TYPE_JWT.to_string(),
        }
    }
}

/// STS token exchange response. Fields may be absent; callers validate.
#[derive(Debug, Default, Deserialize)]
pub struct StsExchangeResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub issued_token_type: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateIdTokenRequest<'a> {
    audience: &'a str,
    include_email: bool,
}

/// IAM Credentials `generateIdToken` response
#[derive(Debug, Default, Deserialize)]
pub struct GenerateIdTokenResponse {
    #[serde(default)]
    pub token: String,
}

/// Capabilities the chain needs from Google Cloud
#[async_trait]
pub trait GoogleIdentity: Send + Sync {
    /// Exchange a subject token at STS
    async fn exchange_token(&self, request: StsExchangeRequest) -> Result<StsExchangeResponse>;

    /// Generate an ID token for `service_account`, authorized by `bearer`
    async fn generate_id_token(
        &self,
        bearer: &str,
        service_account: &str,
        audience: &str,
        include_email: bool,
    ) -> Result<GenerateIdTokenResponse>;
}

/// REST client for STS and IAM Credentials.
///
/// Sends no ambient credentials: STS is unauthenticated and IAM Credentials
/// receives the federated token explicitly.
pub struct GoogleCloudClient {
    http_client: Client,
    sts_endpoint: String,
    iam_credentials_endpoint: String,
}

impl GoogleCloudClient {
    pub fn new(
        sts_endpoint: &str,
        iam_credentials_endpoint: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            sts_endpoint: sts_endpoint.trim_end_matches('/').to_string(),
            iam_credentials_endpoint: iam_credentials_endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GoogleIdentity for GoogleCloudClient {
    async fn exchange_token(&self, request: StsExchangeRequest) -> Result<StsExchangeResponse> {
        let url = format!("{}/v1/token", self.sts_endpoint);
        debug!(url = %url, audience = %request.audience, "Calling GCP STS");

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to call GCP STS")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("GCP STS failed with {}: {}", status, body);
        }

        response
            .json::<StsExchangeResponse>()
            .await
            .context("Failed to parse GCP STS response")
    }

    async fn generate_id_token(
        &self,
        bearer: &str,
        service_account: &str,
        audience: &str,
        include_email: bool,
    ) -> Result<GenerateIdTokenResponse> {
        let url = format!(
            "{}/v1/projects/-/serviceAccounts/{}:generateIdToken",
            self.iam_credentials_endpoint,
            urlencoding::encode(service_account)
        );
        debug!(
            service_account = %service_account,
            audience = %audience,
            "Calling IAM generateIdToken"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(bearer)
            .json(&GenerateIdTokenRequest {
                audience,
                include_email,
            })
            .send()
            .await
            .context("Failed to call IAM Credentials")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!(
                "IAM generateIdToken for {} failed with {}: {}",
                service_account,
                status,
                body
            );
        }

        response
            .json::<GenerateIdTokenResponse>()
            .await
            .context("Failed to parse IAM generateIdToken response")
    }
}

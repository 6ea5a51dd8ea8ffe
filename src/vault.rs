//! HashiCorp Vault GCP auth login
//!
//! Presents a Google-signed ID token to `auth/<mount>/login` and returns the
//! Vault client token.

use anyhow::{bail, Context, Result};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::types::SessionToken;

/// Default mount path of the GCP auth method
pub const DEFAULT_AUTH_MOUNT_PATH: &str = "gcp";

/// Default per-request timeout for Vault calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Vault client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultConfig {
    pub address: String,
    pub namespace: Option<String>,
    pub auth_mount_path: String,
    pub skip_verify: bool,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    pub role: String,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

#[derive(Debug, Serialize)]
struct GcpLoginRequest<'a> {
    role: &'a str,
    jwt: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: Option<AuthInfo>,
}

#[derive(Debug, Deserialize)]
struct AuthInfo {
    #[serde(default)]
    client_token: String,
    accessor: Option<String>,
    #[serde(default)]
    policies: Vec<String>,
    lease_duration: Option<u64>,
    #[serde(default)]
    renewable: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// Vault REST API client
#[derive(Debug, Clone)]
pub struct VaultClient {
    http: Client,
    base_url: Url,
    namespace: Option<String>,
}

impl VaultClient {
    fn user_agent() -> String {
        format!("gke-vault-auth/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Build a client from configuration. Fails on a malformed address.
    pub fn new(config: &VaultConfig) -> Result<Self> {
        let base_url = Url::parse(config.address.trim())
            .with_context(|| format!("Invalid Vault address: {}", config.address))?;

        if base_url.scheme() != "https" && base_url.scheme() != "http" {
            bail!("Unsupported Vault address scheme: {}", base_url.scheme());
        }
        if base_url.host_str().is_none() {
            bail!("Vault address has no host: {}", config.address);
        }
        if config.request_timeout.is_zero() {
            bail!("Vault request timeout must be greater than zero");
        }

        let http = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.skip_verify)
            .build()
            .context("Failed to build Vault HTTP client")?;

        let namespace = config
            .namespace
            .as_deref()
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);

        Ok(Self {
            http,
            base_url,
            namespace,
        })
    }

    fn login_url(&self, mount_path: &str) -> Result<Url> {
        let mount = mount_path.trim_matches('/');
        let mount = if mount.is_empty() {
            DEFAULT_AUTH_MOUNT_PATH
        } else {
            mount
        };

        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/v1/auth/{}/login", base, mount))
            .with_context(|| format!("Invalid auth mount path: {}", mount_path))
    }

    /// Log in with the GCP auth method (`iam` type, JWT presented directly)
    pub async fn gcp_login(&self, mount_path: &str, role: &str, jwt: &str) -> Result<SessionToken> {
        let url = self.login_url(mount_path)?;
        debug!(url = %url, role = %role, namespace = ?self.namespace, "Logging in to Vault");

        let mut request = self
            .http
            .post(url)
            .header("X-Vault-Request", "true")
            .json(&GcpLoginRequest { role, jwt });

        if let Some(namespace) = &self.namespace {
            request = request.header("X-Vault-Namespace", namespace);
        }

        let response = request
            .send()
            .await
            .context("Failed to send login request to Vault")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let errors = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.errors.join("; "))
                .unwrap_or(body);
            bail!("Vault login failed with {}: {}", status, errors);
        }

        let login: LoginResponse = response
            .json()
            .await
            .context("Failed to parse Vault login response")?;

        let auth = login.auth.context("Vault login response has no auth block")?;
        if auth.client_token.is_empty() {
            bail!("Vault login response has an empty client token");
        }

        let mut session = SessionToken::new(auth.client_token);
        session.accessor = auth.accessor;
        session.policies = auth.policies;
        session.lease_duration = auth.lease_duration;
        session.renewable = auth.renewable;

        Ok(session)
    }
}

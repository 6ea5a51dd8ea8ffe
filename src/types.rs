//! Credential and context types passed between stages
//!
//! Token types are not `Clone`. Each one is moved into the stage that
//! consumes it.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

/// Facts gathered by identity discovery
#[derive(Debug)]
pub struct DiscoveredIdentity {
    pub cluster_name: String,
    pub region: String,
    pub project: String,
    pub ksa_namespace: String,
    pub ksa_name: String,
    /// Projected service account token read from disk (bootstrap credential only)
    pub bootstrap_token: SecretString,
}

/// Everything the chain needs to know about the running workload
///
/// Built once per run, after the service account mapping is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadContext {
    ksa_name: String,
    ksa_namespace: String,
    gsa_email: String,
    cluster_name: String,
    region: String,
    project: String,
    vault_role: String,
}

impl WorkloadContext {
    pub fn new(identity: &DiscoveredIdentity, gsa_email: String, vault_role: String) -> Self {
        Self {
            ksa_name: identity.ksa_name.clone(),
            ksa_namespace: identity.ksa_namespace.clone(),
            gsa_email,
            cluster_name: identity.cluster_name.clone(),
            region: identity.region.clone(),
            project: identity.project.clone(),
            vault_role,
        }
    }

    pub fn ksa_name(&self) -> &str {
        &self.ksa_name
    }

    pub fn ksa_namespace(&self) -> &str {
        &self.ksa_namespace
    }

    pub fn gsa_email(&self) -> &str {
        &self.gsa_email
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn vault_role(&self) -> &str {
        &self.vault_role
    }
}

impl std::fmt::Display for WorkloadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ksa={}/{} gsa={} cluster={} region={} project={} role={}",
            self.ksa_namespace,
            self.ksa_name,
            self.gsa_email,
            self.cluster_name,
            self.region,
            self.project,
            self.vault_role
        )
    }
}

/// Bound token created by the Kubernetes TokenRequest API
#[derive(Debug)]
pub struct MintedToken {
    pub token: SecretString,
    pub audiences: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Google federated access token returned by STS
#[derive(Debug)]
pub struct FederatedAccessToken {
    access_token: SecretString,
}

impl FederatedAccessToken {
    pub fn new(access_token: String) -> Self {
        Self {
            access_token: SecretString::new(access_token),
        }
    }

    /// Value for an `Authorization: Bearer` header
    pub fn bearer(&self) -> &str {
        self.access_token.expose_secret()
    }
}

/// Google-signed identity token audienced for Vault
#[derive(Debug)]
pub struct SignedIdentityToken {
    token: SecretString,
    audience: String,
}

impl SignedIdentityToken {
    pub fn new(token: String, audience: String) -> Self {
        Self {
            token: SecretString::new(token),
            audience,
        }
    }

    pub fn jwt(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }
}

/// Vault session returned by the GCP auth login
#[derive(Debug)]
pub struct SessionToken {
    client_token: SecretString,
    pub accessor: Option<String>,
    pub policies: Vec<String>,
    pub lease_duration: Option<u64>,
    pub renewable: bool,
}

impl SessionToken {
    pub fn new(client_token: String) -> Self {
        Self {
            client_token: SecretString::new(client_token),
            accessor: None,
            policies: Vec::new(),
            lease_duration: None,
            renewable: false,
        }
    }

    /// The Vault client token. Callers decide how it is stored.
    pub fn expose(&self) -> &str {
        self.client_token.expose_secret()
    }
}

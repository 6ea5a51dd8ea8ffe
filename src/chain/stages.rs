//! Individual hops of the exchange chain
//!
//! Each function takes the previous hop's credential by value and converts any
//! failure into the [`ChainError`] variant for its stage.

use anyhow::{anyhow, Context};
use secrecy::ExposeSecret;
use tracing::info;

use crate::audience::{federation_audience, vault_audience, workload_identity_pool};
use crate::error::{ChainError, Stage};
use crate::google::{GoogleIdentity, StsExchangeRequest};
use crate::kubernetes::{ControlPlane, GCP_SERVICE_ACCOUNT_ANNOTATION};
use crate::types::{
    FederatedAccessToken, MintedToken, SessionToken, SignedIdentityToken, WorkloadContext,
};
use crate::vault::{VaultClient, VaultConfig};

/// Minimum lifetime the TokenRequest API accepts
pub const MIN_TOKEN_EXPIRATION_SECONDS: i64 = 600;

/// Look up the Google service account mapped to `namespace/name`
pub async fn resolve_service_account(
    control_plane: &dyn ControlPlane,
    namespace: &str,
    name: &str,
) -> Result<String, ChainError> {
    let annotation = control_plane
        .service_account_annotation(namespace, name, GCP_SERVICE_ACCOUNT_ANNOTATION)
        .await
        .with_context(|| format!("Failed to read ServiceAccount {}/{}", namespace, name))
        .map_err(|e| ChainError::at(Stage::Resolution, e))?;

    let gsa = annotation
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ChainError::Resolution(format!(
                "ServiceAccount {}/{} has no {} annotation",
                namespace, name, GCP_SERVICE_ACCOUNT_ANNOTATION
            ))
        })?;

    info!(ksa = %name, namespace = %namespace, gsa = %gsa, "Resolved Google service account");
    Ok(gsa)
}

/// Mint a KSA token audienced for the project's Workload Identity pool
pub async fn mint_token(
    control_plane: &dyn ControlPlane,
    context: &WorkloadContext,
    expiration_seconds: i64,
) -> Result<MintedToken, ChainError> {
    let audiences = vec![workload_identity_pool(context.project())];

    let minted = control_plane
        .create_token(
            context.ksa_namespace(),
            context.ksa_name(),
            expiration_seconds,
            audiences,
        )
        .await
        .with_context(|| {
            format!(
                "Failed to request token for ServiceAccount {}/{}",
                context.ksa_namespace(),
                context.ksa_name()
            )
        })
        .map_err(|e| ChainError::at(Stage::Mint, e))?;

    if minted.token.expose_secret().is_empty() {
        return Err(ChainError::Mint("TokenRequest returned an empty token".to_string()));
    }

    info!(
        audiences = ?minted.audiences,
        expires_at = ?minted.expires_at,
        "Minted Kubernetes service account token"
    );
    Ok(minted)
}

/// Exchange the minted token for a Google federated access token
pub async fn exchange_token(
    google: &dyn GoogleIdentity,
    context: &WorkloadContext,
    minted: MintedToken,
) -> Result<FederatedAccessToken, ChainError> {
    if let Some(expires_at) = minted.expires_at {
        if expires_at <= chrono::Utc::now() {
            return Err(ChainError::Exchange(format!(
                "Minted token expired at {}",
                expires_at
            )));
        }
    }

    let audience = federation_audience(context.project(), context.region(), context.cluster_name());
    info!(audience = %audience, "Exchanging Kubernetes token at GCP STS");

    let request =
        StsExchangeRequest::for_kubernetes_token(minted.token.expose_secret().clone(), audience);

    let response = google
        .exchange_token(request)
        .await
        .context("Failed to exchange Kubernetes service account token for Google federated token")
        .map_err(|e| ChainError::at(Stage::Exchange, e))?;

    if response.access_token.is_empty() {
        return Err(ChainError::at(
            Stage::Exchange,
            anyhow!("Empty token response when exchanging Kubernetes service account token"),
        ));
    }

    info!(expires_in = ?response.expires_in, "Obtained Google federated access token");
    Ok(FederatedAccessToken::new(response.access_token))
}

/// Generate a Google ID token for the mapped service account, audienced for Vault
pub async fn issue_identity_token(
    google: &dyn GoogleIdentity,
    context: &WorkloadContext,
    federated: FederatedAccessToken,
) -> Result<SignedIdentityToken, ChainError> {
    let audience = vault_audience(context.vault_role());

    let response = google
        .generate_id_token(federated.bearer(), context.gsa_email(), &audience, true)
        .await
        .with_context(|| {
            format!(
                "Failed to exchange Google federated token for ID token of {}",
                context.gsa_email()
            )
        })
        .map_err(|e| ChainError::at(Stage::Issuance, e))?;

    if response.token.is_empty() {
        return Err(ChainError::Issuance(format!(
            "IAM returned an empty ID token for {}",
            context.gsa_email()
        )));
    }

    info!(gsa = %context.gsa_email(), audience = %audience, "Obtained Google ID token");
    Ok(SignedIdentityToken::new(response.token, audience))
}

/// Log in to Vault with the ID token
pub async fn authenticate(
    config: &VaultConfig,
    id_token: SignedIdentityToken,
) -> Result<SessionToken, ChainError> {
    let client = VaultClient::new(config)
        .context("Failed to construct Vault client")
        .map_err(|e| ChainError::at(Stage::Authentication, e))?;

    let session = client
        .gcp_login(&config.auth_mount_path, &config.role, id_token.jwt())
        .await
        .with_context(|| {
            format!(
                "Failed to authenticate to Vault role {} at auth/{}",
                config.role,
                config.auth_mount_path.trim_matches('/')
            )
        })
        .map_err(|e| ChainError::at(Stage::Authentication, e))?;

    info!(
        role = %config.role,
        policies = ?session.policies,
        lease_duration = ?session.lease_duration,
        "Authenticated to Vault"
    );
    Ok(session)
}

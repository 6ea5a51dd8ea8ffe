//! Identity Discovery
//!
//! Gathers who and where the workload is: the KSA token and namespace from the
//! projected service account volume, the KSA name from the token claims, and
//! cluster/region/project from the metadata server.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::claims::decode_untrusted;
use crate::error::{ChainError, Stage};
use crate::metadata::MetadataSource;
use crate::types::DiscoveredIdentity;

/// Standard projected token path
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Standard projected namespace path
pub const DEFAULT_NAMESPACE_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Locations of the projected service account files
#[derive(Debug, Clone)]
pub struct LocalIdentityPaths {
    pub token_path: PathBuf,
    pub namespace_path: PathBuf,
}

impl Default for LocalIdentityPaths {
    fn default() -> Self {
        Self {
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            namespace_path: PathBuf::from(DEFAULT_NAMESPACE_PATH),
        }
    }
}

struct LocalIdentity {
    token: String,
    namespace: String,
    name: String,
}

/// Read the local files and decode the KSA name. No network access.
fn read_local_identity(paths: &LocalIdentityPaths) -> Result<LocalIdentity> {
    let token = std::fs::read_to_string(&paths.token_path).with_context(|| {
        format!(
            "Failed to read SA token from {}",
            paths.token_path.display()
        )
    })?;

    let namespace = std::fs::read_to_string(&paths.namespace_path)
        .with_context(|| {
            format!(
                "Failed to read SA namespace from {}",
                paths.namespace_path.display()
            )
        })?
        .trim()
        .to_string();

    if namespace.is_empty() {
        bail!("SA namespace file {} is empty", paths.namespace_path.display());
    }

    let claims = decode_untrusted(&token)?;

    if claims.kubernetes.namespace != namespace {
        warn!(
            file_namespace = %namespace,
            claim_namespace = %claims.kubernetes.namespace,
            "SA token namespace differs from namespace file, using the file"
        );
    }

    Ok(LocalIdentity {
        token: token.trim().to_string(),
        namespace,
        name: claims.kubernetes.serviceaccount.name,
    })
}

async fn read_metadata(
    metadata: &dyn MetadataSource,
) -> Result<(String, String, String)> {
    let cluster_name = metadata
        .instance_attribute("cluster-name")
        .await
        .context("Failed to fetch GKE cluster name from instance metadata")?;

    let region = metadata
        .instance_attribute("cluster-location")
        .await
        .context("Failed to fetch cluster location from instance metadata")?;

    let project = metadata
        .project_id()
        .await
        .context("Failed to fetch project from instance metadata")?;

    Ok((cluster_name, region, project))
}

/// Discover the workload identity.
///
/// Local inputs are read and decoded first so that a malformed token fails
/// before the metadata server is contacted.
pub async fn discover(
    metadata: &dyn MetadataSource,
    paths: &LocalIdentityPaths,
) -> Result<DiscoveredIdentity, ChainError> {
    let local = read_local_identity(paths).map_err(|e| ChainError::at(Stage::Discovery, e))?;

    let (cluster_name, region, project) = read_metadata(metadata)
        .await
        .map_err(|e| ChainError::at(Stage::Discovery, e))?;

    info!(
        ksa = %local.name,
        namespace = %local.namespace,
        cluster = %cluster_name,
        region = %region,
        project = %project,
        "Workload identity discovered"
    );

    Ok(DiscoveredIdentity {
        cluster_name,
        region,
        project,
        ksa_namespace: local.namespace,
        ksa_name: local.name,
        bootstrap_token: SecretString::new(local.token),
    })
}

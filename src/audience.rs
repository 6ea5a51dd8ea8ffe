//! Audience strings for each hop

/// Workload Identity pool for a project: `<project>.svc.id.goog`
pub fn workload_identity_pool(project: &str) -> String {
    format!("{}.svc.id.goog", project)
}

/// GKE cluster acting as the identity provider for the pool
pub fn identity_provider(project: &str, region: &str, cluster: &str) -> String {
    format!(
        "https://container.googleapis.com/v1/projects/{}/locations/{}/clusters/{}",
        project, region, cluster
    )
}

/// Audience for the STS exchange: `identitynamespace:<pool>:<provider>`
pub fn federation_audience(project: &str, region: &str, cluster: &str) -> String {
    format!(
        "identitynamespace:{}:{}",
        workload_identity_pool(project),
        identity_provider(project, region, cluster)
    )
}

/// Audience of the Google ID token presented to Vault.
///
/// Vault's GCP auth method expects `https://vault/<role>` regardless of the
/// address Vault is actually served on.
pub fn vault_audience(role: &str) -> String {
    format!("https://vault/{}", role)
}

//! GKE Vault Auth Library
//!
//! Federates a GKE workload's Kubernetes service account identity into a
//! HashiCorp Vault session: KSA token, Google STS, IAM `generateIdToken`, then
//! Vault's GCP auth method.

pub mod audience;
pub mod chain;
pub mod claims;
pub mod config;
pub mod discovery;
pub mod error;
pub mod google;
pub mod kubernetes;
pub mod metadata;
pub mod types;
pub mod vault;

#[cfg(test)]
mod testing;

pub use chain::{ChainOptions, ChainOutcome, TokenExchangeChain};
pub use config::{Args, Settings};
pub use error::{ChainError, Stage};
pub use google::{GoogleCloudClient, GoogleIdentity};
pub use kubernetes::{ControlPlane, KubeControlPlane};
pub use metadata::{GceMetadataClient, MetadataSource};
pub use types::{SessionToken, WorkloadContext};

//! Token Exchange Chain
//!
//! Runs the six stages in order: discovery, service account resolution,
//! token minting, STS exchange, ID token issuance and Vault login. The first
//! failure aborts the run.

pub mod stages;

use std::future::Future;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::discovery::{discover, LocalIdentityPaths};
use crate::error::{ChainError, Stage};
use crate::google::GoogleIdentity;
use crate::kubernetes::ControlPlane;
use crate::metadata::MetadataSource;
use crate::types::{SessionToken, WorkloadContext};
use crate::vault::VaultConfig;

pub use stages::MIN_TOKEN_EXPIRATION_SECONDS;

/// Inputs that do not come from the environment at runtime
#[derive(Debug, Clone)]
pub struct ChainOptions {
    pub paths: LocalIdentityPaths,
    pub token_expiration_seconds: i64,
    pub vault: VaultConfig,
}

/// Result of a successful run
#[derive(Debug)]
pub struct ChainOutcome {
    pub context: WorkloadContext,
    pub session: SessionToken,
}

#[derive(Serialize)]
struct OutcomeDocument<'a> {
    context: &'a WorkloadContext,
    vault_token: &'a str,
    accessor: Option<&'a str>,
    policies: &'a [String],
    lease_duration: Option<u64>,
    renewable: bool,
}

impl ChainOutcome {
    /// Context and token as a single JSON document
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&OutcomeDocument {
            context: &self.context,
            vault_token: self.session.expose(),
            accessor: self.session.accessor.as_deref(),
            policies: &self.session.policies,
            lease_duration: self.session.lease_duration,
            renewable: self.session.renewable,
        })
    }
}

/// The GKE to Vault credential federation pipeline
pub struct TokenExchangeChain {
    metadata: Box<dyn MetadataSource>,
    control_plane: Box<dyn ControlPlane>,
    google: Box<dyn GoogleIdentity>,
    options: ChainOptions,
}

impl TokenExchangeChain {
    pub fn new(
        metadata: Box<dyn MetadataSource>,
        control_plane: Box<dyn ControlPlane>,
        google: Box<dyn GoogleIdentity>,
        options: ChainOptions,
    ) -> Self {
        Self {
            metadata,
            control_plane,
            google,
            options,
        }
    }

    /// Run every stage once. Each stage is raced against `cancel`.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ChainOutcome, ChainError> {
        let identity = guard(
            cancel,
            Stage::Discovery,
            discover(self.metadata.as_ref(), &self.options.paths),
        )
        .await?;

        let gsa_email = guard(
            cancel,
            Stage::Resolution,
            stages::resolve_service_account(
                self.control_plane.as_ref(),
                &identity.ksa_namespace,
                &identity.ksa_name,
            ),
        )
        .await?;

        let context = WorkloadContext::new(&identity, gsa_email, self.options.vault.role.clone());
        info!(context = %context, "Workload context resolved");

        let minted = guard(
            cancel,
            Stage::Mint,
            stages::mint_token(
                self.control_plane.as_ref(),
                &context,
                self.options.token_expiration_seconds,
            ),
        )
        .await?;

        let federated = guard(
            cancel,
            Stage::Exchange,
            stages::exchange_token(self.google.as_ref(), &context, minted),
        )
        .await?;

        let id_token = guard(
            cancel,
            Stage::Issuance,
            stages::issue_identity_token(self.google.as_ref(), &context, federated),
        )
        .await?;

        let session = guard(
            cancel,
            Stage::Authentication,
            stages::authenticate(&self.options.vault, id_token),
        )
        .await?;

        Ok(ChainOutcome { context, session })
    }
}

async fn guard<T, F>(cancel: &CancellationToken, stage: Stage, fut: F) -> Result<T, ChainError>
where
    F: Future<Output = Result<T, ChainError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChainError::Cancelled(stage)),
        result = fut => result,
    }
}

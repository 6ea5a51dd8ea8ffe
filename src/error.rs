//! Error taxonomy for the token exchange chain
//!
//! Every stage reports failures through one variant of [`ChainError`], so a
//! caller can tell which hop broke without parsing messages.

use thiserror::Error;

/// A single step of the exchange chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Discovery,
    Resolution,
    Mint,
    Exchange,
    Issuance,
    Authentication,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Config => write!(f, "configuration"),
            Stage::Discovery => write!(f, "identity discovery"),
            Stage::Resolution => write!(f, "service account resolution"),
            Stage::Mint => write!(f, "token minting"),
            Stage::Exchange => write!(f, "federation exchange"),
            Stage::Issuance => write!(f, "identity token issuance"),
            Stage::Authentication => write!(f, "vault authentication"),
        }
    }
}

/// Errors that can occur while exchanging credentials
#[derive(Debug, Error)]
pub enum ChainError {
    /// Missing or malformed configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Local identity inputs or instance metadata unavailable
    #[error("identity discovery failed: {0}")]
    Discovery(String),

    /// Kubernetes service account lookup or annotation missing
    #[error("service account resolution failed: {0}")]
    Resolution(String),

    /// Kubernetes TokenRequest rejected
    #[error("token minting failed: {0}")]
    Mint(String),

    /// Google STS exchange failed or returned no token
    #[error("federation exchange failed: {0}")]
    Exchange(String),

    /// IAM Credentials refused to issue an identity token
    #[error("identity token issuance failed: {0}")]
    Issuance(String),

    /// Vault client construction or login failed
    #[error("vault authentication failed: {0}")]
    Auth(String),

    /// The run was cancelled while the given stage was in flight
    #[error("cancelled during {0}")]
    Cancelled(Stage),
}

impl ChainError {
    /// Stage that produced this error
    pub fn stage(&self) -> Stage {
        match self {
            ChainError::Config(_) => Stage::Config,
            ChainError::Discovery(_) => Stage::Discovery,
            ChainError::Resolution(_) => Stage::Resolution,
            ChainError::Mint(_) => Stage::Mint,
            ChainError::Exchange(_) => Stage::Exchange,
            ChainError::Issuance(_) => Stage::Issuance,
            ChainError::Auth(_) => Stage::Authentication,
            ChainError::Cancelled(stage) => *stage,
        }
    }

    /// Wrap an `anyhow` error (with its full context chain) as the variant for `stage`
    pub fn at(stage: Stage, err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        match stage {
            Stage::Config => ChainError::Config(message),
            Stage::Discovery => ChainError::Discovery(message),
            Stage::Resolution => ChainError::Resolution(message),
            Stage::Mint => ChainError::Mint(message),
            Stage::Exchange => ChainError::Exchange(message),
            Stage::Issuance => ChainError::Issuance(message),
            Stage::Authentication => ChainError::Auth(message),
        }
    }
}

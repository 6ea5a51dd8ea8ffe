//! Command line and environment configuration
//!
//! Every option can be given as a flag or through its environment variable.
//! [`Args::into_settings`] validates the raw values before any client exists.

use clap::{Parser, ValueEnum};
use reqwest::Url;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::chain::{ChainOptions, MIN_TOKEN_EXPIRATION_SECONDS};
use crate::discovery::{LocalIdentityPaths, DEFAULT_NAMESPACE_PATH, DEFAULT_TOKEN_PATH};
use crate::error::ChainError;
use crate::google::{DEFAULT_IAM_CREDENTIALS_ENDPOINT, DEFAULT_STS_ENDPOINT};
use crate::metadata::DEFAULT_METADATA_HOST;
use crate::vault::{VaultConfig, DEFAULT_AUTH_MOUNT_PATH, DEFAULT_REQUEST_TIMEOUT};

/// Authenticate this GKE workload to Vault through Workload Identity
#[derive(Parser, Debug)]
#[command(name = "gke-vault-auth", version, about)]
pub struct Args {
    /// Vault server address
    #[arg(long, env = "VAULT_ADDR")]
    pub vault_addr: Option<String>,

    /// Vault namespace
    #[arg(long, env = "VAULT_NAMESPACE")]
    pub vault_namespace: Option<String>,

    /// Mount path of the GCP auth method
    #[arg(long, env = "VAULT_GCP_AUTH_MOUNT_PATH", default_value = DEFAULT_AUTH_MOUNT_PATH)]
    pub vault_auth_mount_path: String,

    /// Skip TLS verification of the Vault server
    #[arg(long, env = "VAULT_SKIP_VERIFY")]
    pub vault_skip_verify: Option<String>,

    /// Vault role to log in as
    #[arg(long, env = "VAULT_ROLE")]
    pub vault_role: Option<String>,

    /// Vault request timeout (e.g. "5", "5s", "500ms", "1m")
    #[arg(long, env = "VAULT_CLIENT_TIMEOUT")]
    pub vault_client_timeout: Option<String>,

    /// Lifetime of the minted service account token in seconds [default: 600]
    #[arg(long, env = "KSA_TOKEN_EXPIRATION_SECONDS")]
    pub token_expiration_seconds: Option<String>,

    /// Projected service account token
    #[arg(
        long,
        env = "KUBERNETES_SERVICE_ACCOUNT_TOKEN_PATH",
        default_value = DEFAULT_TOKEN_PATH
    )]
    pub token_path: PathBuf,

    /// Projected service account namespace
    #[arg(
        long,
        env = "KUBERNETES_SERVICE_ACCOUNT_NAMESPACE_PATH",
        default_value = DEFAULT_NAMESPACE_PATH
    )]
    pub namespace_path: PathBuf,

    /// GCE metadata server host
    #[arg(long, env = "GCE_METADATA_HOST", default_value = DEFAULT_METADATA_HOST)]
    pub metadata_host: String,

    /// Google STS base URL
    #[arg(long, env = "GCP_STS_ENDPOINT", default_value = DEFAULT_STS_ENDPOINT)]
    pub sts_endpoint: String,

    /// Google IAM Credentials base URL
    #[arg(
        long,
        env = "GCP_IAM_CREDENTIALS_ENDPOINT",
        default_value = DEFAULT_IAM_CREDENTIALS_ENDPOINT
    )]
    pub iam_credentials_endpoint: String,

    /// Timeout in seconds for metadata, Kubernetes and Google calls [default: 30]
    #[arg(long, env = "HTTP_TIMEOUT_SECONDS")]
    pub http_timeout_seconds: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Write the result to this file (mode 0600) instead of stdout
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    /// Log format, "text" or "json" [default: text]
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Default for `HTTP_TIMEOUT_SECONDS`
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;

/// Validated runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub chain: ChainOptions,
    pub metadata_host: String,
    pub sts_endpoint: String,
    pub iam_credentials_endpoint: String,
    pub http_timeout: Duration,
    pub output: OutputFormat,
    pub output_file: Option<PathBuf>,
}

impl Args {
    /// Requested log format. Needed before logging is set up.
    pub fn log_format(&self) -> Result<LogFormat, ChainError> {
        match self.log_format.as_deref().map(str::trim) {
            None | Some("") => Ok(LogFormat::Text),
            Some(value) => <LogFormat as ValueEnum>::from_str(value, true).map_err(|_| {
                ChainError::Config(format!(
                    "LOG_FORMAT {:?} must be \"text\" or \"json\"",
                    value
                ))
            }),
        }
    }

    /// Validate raw arguments into [`Settings`]
    pub fn into_settings(self) -> Result<Settings, ChainError> {
        self.log_format()?;

        let address = required("VAULT_ADDR", self.vault_addr)?;
        let url = Url::parse(&address).map_err(|e| {
            ChainError::Config(format!("VAULT_ADDR {:?} is not a URL: {}", address, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ChainError::Config(format!(
                "VAULT_ADDR {:?} must be an http(s) URL",
                address
            )));
        }

        let role = required("VAULT_ROLE", self.vault_role)?;

        let skip_verify = match self.vault_skip_verify.as_deref() {
            None | Some("") => false,
            Some(value) => parse_bool("VAULT_SKIP_VERIFY", value)?,
        };

        let request_timeout = match self.vault_client_timeout.as_deref() {
            None | Some("") => DEFAULT_REQUEST_TIMEOUT,
            Some(value) => parse_timeout("VAULT_CLIENT_TIMEOUT", value)?,
        };

        let token_expiration_seconds = parse_number(
            "KSA_TOKEN_EXPIRATION_SECONDS",
            self.token_expiration_seconds.as_deref(),
            MIN_TOKEN_EXPIRATION_SECONDS,
        )?;
        if token_expiration_seconds < MIN_TOKEN_EXPIRATION_SECONDS {
            return Err(ChainError::Config(format!(
                "KSA_TOKEN_EXPIRATION_SECONDS must be at least {}, got {}",
                MIN_TOKEN_EXPIRATION_SECONDS, token_expiration_seconds
            )));
        }

        let http_timeout_seconds = parse_number(
            "HTTP_TIMEOUT_SECONDS",
            self.http_timeout_seconds.as_deref(),
            DEFAULT_HTTP_TIMEOUT_SECONDS,
        )?;
        if http_timeout_seconds == 0 {
            return Err(ChainError::Config(
                "HTTP_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        let mount = self.vault_auth_mount_path.trim().trim_matches('/');
        let auth_mount_path = if mount.is_empty() {
            DEFAULT_AUTH_MOUNT_PATH.to_string()
        } else {
            mount.to_string()
        };

        let vault = VaultConfig {
            address,
            namespace: self.vault_namespace.filter(|ns| !ns.trim().is_empty()),
            auth_mount_path,
            skip_verify,
            request_timeout,
            role,
        };

        Ok(Settings {
            chain: ChainOptions {
                paths: LocalIdentityPaths {
                    token_path: self.token_path,
                    namespace_path: self.namespace_path,
                },
                token_expiration_seconds,
                vault,
            },
            metadata_host: self.metadata_host,
            sts_endpoint: self.sts_endpoint,
            iam_credentials_endpoint: self.iam_credentials_endpoint,
            http_timeout: Duration::from_secs(http_timeout_seconds),
            output: self.output,
            output_file: self.output_file,
        })
    }
}

fn required(name: &str, value: Option<String>) -> Result<String, ChainError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ChainError::Config(format!("{} must be set", name)))
}

fn parse_number<T: FromStr>(name: &str, value: Option<&str>, default: T) -> Result<T, ChainError> {
    match value.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value.parse().map_err(|_| {
            ChainError::Config(format!("{} has invalid number {:?}", name, value))
        }),
    }
}

/// Parse a boolean the way Vault's own tooling does
pub fn parse_bool(name: &str, value: &str) -> Result<bool, ChainError> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(ChainError::Config(format!(
            "{} has invalid boolean value {:?}",
            name, other
        ))),
    }
}

/// Parse a timeout given as bare seconds or with an `ms`, `s` or `m` suffix
pub fn parse_timeout(name: &str, value: &str) -> Result<Duration, ChainError> {
    let value = value.trim();
    let invalid = || ChainError::Config(format!("{} has invalid duration {:?}", name, value));

    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let amount: u64 = number.parse().map_err(|_| invalid())?;

    let timeout = match unit {
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        _ => return Err(invalid()),
    };

    if timeout.is_zero() {
        return Err(ChainError::Config(format!("{} must be greater than zero", name)));
    }
    Ok(timeout)
}

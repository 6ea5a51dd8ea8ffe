//! gke-vault-auth
//!
//! Logs a GKE workload in to Vault using its Kubernetes service account,
//! exchanged through Google Workload Identity Federation.
//!
//! ## Usage
//!
//! ```bash
//! # Print the resolved context and the Vault token
//! VAULT_ADDR=https://vault.example:8200 VAULT_ROLE=client gke-vault-auth
//!
//! # Write the result as JSON to a file readable only by the owner
//! gke-vault-auth --vault-role client --output json --output-file /vault/token.json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use gke_vault_auth::config::{Args, LogFormat, OutputFormat, Settings};
use gke_vault_auth::error::{ChainError, Stage};
use gke_vault_auth::{
    ChainOutcome, GceMetadataClient, GoogleCloudClient, KubeControlPlane, TokenExchangeChain,
};
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_format = args.log_format();
    init_logging(*log_format.as_ref().unwrap_or(&LogFormat::Text));
    if let Err(e) = log_format {
        return fail(&e);
    }

    let settings = match args.into_settings() {
        Ok(settings) => settings,
        Err(e) => return fail(&e),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let outcome = match run(&settings, &cancel).await {
        Ok(outcome) => outcome,
        Err(e) => return fail(&e),
    };

    if let Err(e) = emit(&outcome, &settings) {
        eprintln!("error: output: {:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn fail(err: &ChainError) -> ExitCode {
    eprintln!("error: {}", err);
    ExitCode::FAILURE
}

async fn run(settings: &Settings, cancel: &CancellationToken) -> Result<ChainOutcome, ChainError> {
    info!(
        vault_addr = %settings.chain.vault.address,
        role = %settings.chain.vault.role,
        mount = %settings.chain.vault.auth_mount_path,
        "Starting GKE Vault auth"
    );

    let metadata = GceMetadataClient::new(&settings.metadata_host, settings.http_timeout)
        .map_err(|e| ChainError::at(Stage::Discovery, e))?;

    let control_plane = KubeControlPlane::from_environment(settings.http_timeout);

    let google = GoogleCloudClient::new(
        &settings.sts_endpoint,
        &settings.iam_credentials_endpoint,
        settings.http_timeout,
    )
    .map_err(|e| ChainError::at(Stage::Exchange, e))?;

    let chain = TokenExchangeChain::new(
        Box::new(metadata),
        Box::new(control_plane),
        Box::new(google),
        settings.chain.clone(),
    );

    chain.run(cancel).await
}

fn emit(outcome: &ChainOutcome, settings: &Settings) -> Result<()> {
    let output = match settings.output {
        OutputFormat::Json => outcome.to_json().context("Failed to serialize result")?,
        OutputFormat::Text => match &settings.output_file {
            Some(_) => outcome.session.expose().to_string(),
            None => format!(
                "Resolved configuration: {}\nVault token: {}",
                outcome.context,
                outcome.session.expose()
            ),
        },
    };

    match &settings.output_file {
        Some(path) => {
            write_private(path, &output)?;
            info!(context = %outcome.context, path = %path.display(), "Vault token written");
        }
        None => println!("{}", output),
    }

    Ok(())
}

/// Write `contents` to `path`, readable only by the owner
fn write_private(path: &Path, contents: &str) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    // An existing file keeps its old mode on open
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {}", path.display()))?;
    }

    writeln!(file, "{}", contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

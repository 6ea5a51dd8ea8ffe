//! Untrusted decoding of the projected service account token
//!
//! The token is only a bootstrap credential: the API server proves it is valid
//! when the TokenRequest is made. Here we read the claims without checking the
//! signature, expiry or audience.

use anyhow::{bail, Context, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashSet;

/// Claims carried by a Kubernetes projected service account token
#[derive(Debug, Deserialize)]
pub struct ServiceAccountClaims {
    #[serde(rename = "kubernetes.io")]
    pub kubernetes: KubernetesClaims,
    #[serde(default)]
    pub sub: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KubernetesClaims {
    pub namespace: String,
    pub serviceaccount: ServiceAccountRef,
}

#[derive(Debug, Deserialize)]
pub struct ServiceAccountRef {
    pub name: String,
    #[serde(default)]
    pub uid: Option<String>,
}

/// Decode the claims of `token` without verifying it.
pub fn decode_untrusted(token: &str) -> Result<ServiceAccountClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    let data = decode::<ServiceAccountClaims>(
        token.trim(),
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .context("Failed to decode service account token claims")?;

    let claims = data.claims;
    if claims.kubernetes.namespace.is_empty() {
        bail!("Service account token has an empty kubernetes.io/namespace claim");
    }
    if claims.kubernetes.serviceaccount.name.is_empty() {
        bail!("Service account token has an empty kubernetes.io/serviceaccount/name claim");
    }

    Ok(claims)
}

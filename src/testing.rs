//! In-memory doubles for the chain's capability traits

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::google::{
    GenerateIdTokenResponse, GoogleIdentity, StsExchangeRequest, StsExchangeResponse,
};
use crate::kubernetes::ControlPlane;
use crate::metadata::MetadataSource;
use crate::types::MintedToken;

/// Ordered record of remote calls shared between fakes
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeMetadata {
    attributes: HashMap<String, String>,
    project: Option<String>,
    log: CallLog,
}

impl FakeMetadata {
    pub fn gke(cluster: &str, region: &str, project: &str) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert("cluster-name".to_string(), cluster.to_string());
        attributes.insert("cluster-location".to_string(), region.to_string());
        Self {
            attributes,
            project: Some(project.to_string()),
            log: CallLog::default(),
        }
    }

    pub fn without(mut self, key: &str) -> Self {
        self.attributes.remove(key);
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn calls(&self) -> usize {
        self.log
            .calls()
            .iter()
            .filter(|c| c.starts_with("metadata:"))
            .count()
    }
}

#[async_trait]
impl MetadataSource for FakeMetadata {
    async fn instance_attribute(&self, key: &str) -> Result<String> {
        self.log.push(format!("metadata:{}", key));
        self.attributes
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("metadata attribute {} not defined", key))
    }

    async fn project_id(&self) -> Result<String> {
        self.log.push("metadata:project-id");
        self.project.clone().ok_or_else(|| anyhow!("project id not defined"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRequest {
    pub namespace: String,
    pub name: String,
    pub expiration_seconds: i64,
    pub audiences: Vec<String>,
}

pub struct FakeControlPlane {
    pub annotations: HashMap<(String, String), Option<String>>,
    pub mint_error: Option<String>,
    pub token: String,
    pub mint_requests: Mutex<Vec<MintRequest>>,
    log: CallLog,
}

impl FakeControlPlane {
    /// A cluster with `namespace/name` annotated with `gsa`
    pub fn with_mapping(namespace: &str, name: &str, gsa: Option<&str>) -> Self {
        let mut annotations = HashMap::new();
        annotations.insert(
            (namespace.to_string(), name.to_string()),
            gsa.map(str::to_string),
        );
        Self {
            annotations,
            mint_error: None,
            token: "minted-ksa-token".to_string(),
            mint_requests: Mutex::new(Vec::new()),
            log: CallLog::default(),
        }
    }

    pub fn failing_mint(mut self, error: &str) -> Self {
        self.mint_error = Some(error.to_string());
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn service_account_annotation(
        &self,
        namespace: &str,
        name: &str,
        _annotation: &str,
    ) -> Result<Option<String>> {
        self.log.push("k8s:get-serviceaccount");
        match self.annotations.get(&(namespace.to_string(), name.to_string())) {
            Some(value) => Ok(value.clone()),
            None => bail!("serviceaccounts \"{}\" not found", name),
        }
    }

    async fn create_token(
        &self,
        namespace: &str,
        name: &str,
        expiration_seconds: i64,
        audiences: Vec<String>,
    ) -> Result<MintedToken> {
        self.log.push("k8s:create-token");
        self.mint_requests.lock().unwrap().push(MintRequest {
            namespace: namespace.to_string(),
            name: name.to_string(),
            expiration_seconds,
            audiences: audiences.clone(),
        });

        if let Some(error) = &self.mint_error {
            bail!("{}", error);
        }

        Ok(MintedToken {
            token: SecretString::new(self.token.clone()),
            audiences,
            expires_at: Some(chrono::Utc::now() + chrono::Duration::seconds(expiration_seconds)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTokenRequest {
    pub bearer: String,
    pub service_account: String,
    pub audience: String,
    pub include_email: bool,
}

pub struct FakeGoogle {
    pub access_token: String,
    pub id_token: String,
    pub sts_error: Option<String>,
    pub iam_error: Option<String>,
    pub sts_requests: Mutex<Vec<StsExchangeRequest>>,
    pub id_token_requests: Mutex<Vec<IdTokenRequest>>,
    log: CallLog,
}

impl FakeGoogle {
    pub fn new(access_token: &str, id_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            id_token: id_token.to_string(),
            sts_error: None,
            iam_error: None,
            sts_requests: Mutex::new(Vec::new()),
            id_token_requests: Mutex::new(Vec::new()),
            log: CallLog::default(),
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }
}

#[async_trait]
impl GoogleIdentity for FakeGoogle {
    async fn exchange_token(&self, request: StsExchangeRequest) -> Result<StsExchangeResponse> {
        self.log.push("gcp:sts-exchange");
        self.sts_requests.lock().unwrap().push(request);

        if let Some(error) = &self.sts_error {
            bail!("{}", error);
        }

        Ok(StsExchangeResponse {
            access_token: self.access_token.clone(),
            token_type: Some("Bearer".to_string()),
            ..Default::default()
        })
    }

    async fn generate_id_token(
        &self,
        bearer: &str,
        service_account: &str,
        audience: &str,
        include_email: bool,
    ) -> Result<GenerateIdTokenResponse> {
        self.log.push("gcp:generate-id-token");
        self.id_token_requests.lock().unwrap().push(IdTokenRequest {
            bearer: bearer.to_string(),
            service_account: service_account.to_string(),
            audience: audience.to_string(),
            include_email,
        });

        if let Some(error) = &self.iam_error {
            bail!("{}", error);
        }

        Ok(GenerateIdTokenResponse {
            token: self.id_token.clone(),
        })
    }
}

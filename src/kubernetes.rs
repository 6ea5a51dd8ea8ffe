//! Kubernetes control plane access
//!
//! Reads the workload's ServiceAccount annotations and creates bound tokens
//! through the TokenRequest subresource. The client is authenticated as the
//! running pod, not as the account being resolved.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Api, PostParams};
use kube::Client;
use secrecy::SecretString;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::types::MintedToken;

/// Annotation that maps a KSA to its Google service account
pub const GCP_SERVICE_ACCOUNT_ANNOTATION: &str = "iam.gke.io/gcp-service-account";

/// Capabilities the chain needs from the cluster control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Value of `annotation` on the ServiceAccount `namespace/name`.
    ///
    /// Errors when the ServiceAccount does not exist; `Ok(None)` when it has no
    /// such annotation.
    async fn service_account_annotation(
        &self,
        namespace: &str,
        name: &str,
        annotation: &str,
    ) -> Result<Option<String>>;

    /// Create a bound token for the ServiceAccount `namespace/name`
    async fn create_token(
        &self,
        namespace: &str,
        name: &str,
        expiration_seconds: i64,
        audiences: Vec<String>,
    ) -> Result<MintedToken>;
}

/// [`ControlPlane`] backed by a kube client
pub struct KubeControlPlane {
    client: OnceCell<Client>,
    timeout: Duration,
}

impl KubeControlPlane {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client: OnceCell::new_with(Some(client)),
            timeout,
        }
    }

    /// Use in-cluster (or kubeconfig) credentials, loaded on the first request
    pub fn from_environment(timeout: Duration) -> Self {
        Self {
            client: OnceCell::new(),
            timeout,
        }
    }

    async fn client(&self) -> Result<Client> {
        self.client
            .get_or_try_init(|| async {
                Client::try_default()
                    .await
                    .context("Failed to create Kubernetes client")
            })
            .await
            .cloned()
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .with_context(|| format!("Timed out after {:?} waiting to {}", self.timeout, what))?
            .with_context(|| format!("Failed to {}", what))
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn service_account_annotation(
        &self,
        namespace: &str,
        name: &str,
        annotation: &str,
    ) -> Result<Option<String>> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client().await?, namespace);
        debug!(namespace = %namespace, name = %name, "Reading ServiceAccount");

        let sa = self
            .bounded(
                &format!("get ServiceAccount {}/{}", namespace, name),
                api.get_opt(name),
            )
            .await?
            .with_context(|| format!("ServiceAccount {}/{} not found", namespace, name))?;

        Ok(annotation_value(&sa, annotation))
    }

    async fn create_token(
        &self,
        namespace: &str,
        name: &str,
        expiration_seconds: i64,
        audiences: Vec<String>,
    ) -> Result<MintedToken> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client().await?, namespace);
        let request = token_request(expiration_seconds, audiences.clone());
        let body = serde_json::to_vec(&request).context("Failed to serialize TokenRequest")?;

        debug!(
            namespace = %namespace,
            name = %name,
            expiration_seconds,
            "Creating TokenRequest"
        );

        let response: TokenRequest = self
            .bounded(
                &format!("create token for ServiceAccount {}/{}", namespace, name),
                api.create_subresource("token", name, &PostParams::default(), body),
            )
            .await?;

        minted_token(response, audiences)
    }
}

fn annotation_value(sa: &ServiceAccount, annotation: &str) -> Option<String> {
    sa.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(annotation))
        .cloned()
}

fn token_request(expiration_seconds: i64, audiences: Vec<String>) -> TokenRequest {
    TokenRequest {
        spec: TokenRequestSpec {
            audiences,
            expiration_seconds: Some(expiration_seconds),
            bound_object_ref: None,
        },
        ..Default::default()
    }
}

fn minted_token(response: TokenRequest, requested_audiences: Vec<String>) -> Result<MintedToken> {
    let status = response
        .status
        .context("TokenRequest response has no status")?;

    if status.token.is_empty() {
        bail!("TokenRequest response contains an empty token");
    }

    let audiences = if response.spec.audiences.is_empty() {
        requested_audiences
    } else {
        response.spec.audiences
    };

    Ok(MintedToken {
        token: SecretString::new(status.token),
        audiences,
        expires_at: Some(status.expiration_timestamp.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::authentication::v1::TokenRequestStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use secrecy::ExposeSecret;
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn control_plane(server: &MockServer, timeout: Duration) -> KubeControlPlane {
        let config = kube::Config::new(server.uri().parse().unwrap());
        KubeControlPlane::new(Client::try_from(config).unwrap(), timeout)
    }

    fn status(code: u16, reason: &str, message: &str) -> ResponseTemplate {
        ResponseTemplate::new(code).set_body_json(json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": code
        }))
    }

    fn service_account(annotations: Option<BTreeMap<String, String>>) -> ServiceAccount {
        ServiceAccount {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                namespace: Some("ns1".to_string()),
                annotations,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_annotation_value() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            GCP_SERVICE_ACCOUNT_ANNOTATION.to_string(),
            "app@myproj.iam.gserviceaccount.com".to_string(),
        );

        let sa = service_account(Some(annotations));
        assert_eq!(
            annotation_value(&sa, GCP_SERVICE_ACCOUNT_ANNOTATION).as_deref(),
            Some("app@myproj.iam.gserviceaccount.com")
        );
        assert_eq!(annotation_value(&service_account(None), GCP_SERVICE_ACCOUNT_ANNOTATION), None);
    }

    #[test]
    fn test_token_request_body() {
        let request = token_request(600, vec!["myproj.svc.id.goog".to_string()]);
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["apiVersion"], "authentication.k8s.io/v1");
        assert_eq!(body["kind"], "TokenRequest");
        assert_eq!(body["spec"]["expirationSeconds"], 600);
        assert_eq!(body["spec"]["audiences"][0], "myproj.svc.id.goog");
    }

    #[test]
    fn test_minted_token_from_status() {
        let expires = chrono::Utc::now();
        let response = TokenRequest {
            spec: TokenRequestSpec {
                audiences: vec!["myproj.svc.id.goog".to_string()],
                ..Default::default()
            },
            status: Some(TokenRequestStatus {
                token: "minted".to_string(),
                expiration_timestamp: Time(expires),
            }),
            ..Default::default()
        };

        let minted = minted_token(response, vec![]).unwrap();

        assert_eq!(minted.token.expose_secret(), "minted");
        assert_eq!(minted.audiences, vec!["myproj.svc.id.goog".to_string()]);
        assert_eq!(minted.expires_at, Some(expires));
    }

    #[test]
    fn test_minted_token_requires_token() {
        let response = TokenRequest {
            status: Some(TokenRequestStatus {
                token: String::new(),
                expiration_timestamp: Time(chrono::Utc::now()),
            }),
            ..Default::default()
        };
        assert!(minted_token(response, vec![]).is_err());
        assert!(minted_token(TokenRequest::default(), vec![]).is_err());
    }

    #[tokio::test]
    async fn test_reads_annotation_from_api_server() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/ns1/serviceaccounts/app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "ServiceAccount",
                "metadata": {
                    "name": "app",
                    "namespace": "ns1",
                    "annotations": {
                        "iam.gke.io/gcp-service-account": "app@p.iam.gserviceaccount.com"
                    }
                }
            })))
            .mount(&server)
            .await;

        let cp = control_plane(&server, Duration::from_secs(5));
        let gsa = cp
            .service_account_annotation("ns1", "app", GCP_SERVICE_ACCOUNT_ANNOTATION)
            .await
            .unwrap();

        assert_eq!(gsa.as_deref(), Some("app@p.iam.gserviceaccount.com"));
    }

    #[tokio::test]
    async fn test_missing_service_account_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/ns1/serviceaccounts/ghost"))
            .respond_with(status(404, "NotFound", "serviceaccounts \"ghost\" not found"))
            .mount(&server)
            .await;

        let cp = control_plane(&server, Duration::from_secs(5));
        let err = cp
            .service_account_annotation("ns1", "ghost", GCP_SERVICE_ACCOUNT_ANNOTATION)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "ServiceAccount ns1/ghost not found");
    }

    #[tokio::test]
    async fn test_creates_token_through_subresource() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/ns1/serviceaccounts/app/token"))
            .and(body_partial_json(json!({
                "kind": "TokenRequest",
                "spec": { "audiences": ["p.svc.id.goog"], "expirationSeconds": 600 }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "apiVersion": "authentication.k8s.io/v1",
                "kind": "TokenRequest",
                "metadata": {},
                "spec": { "audiences": ["p.svc.id.goog"], "expirationSeconds": 600 },
                "status": { "token": "minted", "expirationTimestamp": "2030-01-01T00:00:00Z" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cp = control_plane(&server, Duration::from_secs(5));
        let minted = cp
            .create_token("ns1", "app", 600, vec!["p.svc.id.goog".to_string()])
            .await
            .unwrap();

        assert_eq!(minted.token.expose_secret(), "minted");
        assert_eq!(minted.audiences, vec!["p.svc.id.goog".to_string()]);
        assert_eq!(
            minted.expires_at.map(|t| t.to_rfc3339()),
            Some("2030-01-01T00:00:00+00:00".to_string())
        );
    }

    #[tokio::test]
    async fn test_forbidden_token_request_is_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/ns1/serviceaccounts/denied/token"))
            .respond_with(status(
                403,
                "Forbidden",
                "serviceaccounts \"denied\" is forbidden: \
                 cannot create resource \"serviceaccounts/token\"",
            ))
            .mount(&server)
            .await;

        let cp = control_plane(&server, Duration::from_secs(5));
        let err = cp
            .create_token("ns1", "denied", 600, vec!["p.svc.id.goog".to_string()])
            .await
            .unwrap_err();

        let message = format!("{:#}", err);
        assert!(message.starts_with("Failed to create token for ServiceAccount ns1/denied"));
        assert!(message.contains("forbidden"));
    }

    #[tokio::test]
    async fn test_slow_api_server_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "apiVersion": "v1",
                        "kind": "ServiceAccount",
                        "metadata": {}
                    }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cp = control_plane(&server, Duration::from_millis(100));
        let err = cp
            .service_account_annotation("ns1", "app", GCP_SERVICE_ACCOUNT_ANNOTATION)
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Timed out after"));
    }
}

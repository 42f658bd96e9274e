//! REST implementation of the engine seam
//!
//! Talks to the engine's JSON API. A session is a bearer token obtained from
//! the engine's SSO endpoint plus an HTTP client configured with the trust
//! settings carried by the credentials.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use capo_common::{Credentials, Error, Operation, Result};

use crate::session::{EngineConnector, EngineSession, Vm, VmRequest};
use crate::version::EngineVersion;

/// Default per-request timeout against the engine
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth scope granting access to the engine API
const SSO_SCOPE: &str = "ovirt-app-api";

const MIB: i64 = 1024 * 1024;

/// Connects to the engine over its REST API
#[derive(Clone, Debug)]
pub struct RestEngineConnector {
    timeout: Duration,
}

impl Default for RestEngineConnector {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl RestEngineConnector {
    /// Create a connector with the given per-request timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn http_client(&self, credentials: &Credentials) -> Result<Client> {
        let mut builder = Client::builder().timeout(self.timeout);

        if credentials.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        } else if !credentials.ca_bundle.is_empty() {
            let certs = Certificate::from_pem_bundle(credentials.ca_bundle.as_bytes())
                .map_err(|e| Error::connection(format!("failed to parse CA bundle: {}", e)))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        } else if !credentials.ca_file.is_empty() {
            let pem = tokio::fs::read(&credentials.ca_file).await.map_err(|e| {
                Error::connection(format!(
                    "failed to read CA file {}: {}",
                    credentials.ca_file, e
                ))
            })?;
            let certs = Certificate::from_pem_bundle(&pem).map_err(|e| {
                Error::connection(format!(
                    "failed to parse CA file {}: {}",
                    credentials.ca_file, e
                ))
            })?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        builder
            .build()
            .map_err(|e| Error::connection(format!("failed to build HTTP client: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// SSO lives next to the API root: `https://host/ovirt-engine/api` ->
/// `https://host/ovirt-engine/sso/oauth/token`
fn token_url(api_url: &str) -> String {
    let base = api_url.strip_suffix("/api").unwrap_or(api_url);
    format!("{}/sso/oauth/token", base)
}

async fn request_token(http: &Client, api_url: &str, credentials: &Credentials) -> Result<String> {
    let url = token_url(api_url);
    let response = http
        .post(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("grant_type", "password"),
            ("scope", SSO_SCOPE),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::connection(format!("failed to reach {}: {}", url, e)))?;

    let status = response.status();
    let body: TokenResponse = response.json().await.map_err(|e| {
        Error::connection(format!(
            "failed to authenticate against {} ({}): unreadable token response: {}",
            api_url, status, e
        ))
    })?;

    match body.access_token {
        Some(token) if status.is_success() && !token.is_empty() => Ok(token),
        _ => Err(Error::connection(format!(
            "failed to authenticate against {} as {} ({}): {}",
            api_url,
            credentials.username,
            status,
            body.error_description
                .or(body.error)
                .unwrap_or_else(|| "no access token returned".to_string())
        ))),
    }
}

#[async_trait]
impl EngineConnector for RestEngineConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn EngineSession>> {
        credentials.ensure_usable()?;

        let http = self.http_client(credentials).await?;
        let api_url = credentials.url.trim_end_matches('/').to_string();
        let token = request_token(&http, &api_url, credentials).await?;

        info!(url = %api_url, username = %credentials.username, "Authenticated against engine");
        Ok(Arc::new(RestEngineSession {
            http,
            api_url,
            token,
        }))
    }
}

/// Engine fault body, e.g. `{"reason": "Operation Failed", "detail": "..."}`
#[derive(Debug, Deserialize)]
struct Fault {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

fn fault_message(body: &str) -> String {
    match serde_json::from_str::<Fault>(body) {
        Ok(Fault {
            detail: Some(detail),
            ..
        }) => detail,
        Ok(Fault {
            reason: Some(reason),
            ..
        }) => reason,
        _ => body.trim().to_string(),
    }
}

/// Map a non-success response onto a remote error
///
/// Server-side failures and throttling are worth retrying; anything else is
/// the engine refusing the request.
async fn check_status(response: Response, operation: Operation) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
    Err(Error::remote_with_hint(
        operation,
        format!("engine returned {}: {}", status, fault_message(&body)),
        retryable,
    ))
}

fn transport_error(operation: Operation, e: reqwest::Error) -> Error {
    Error::remote_with_hint(operation, format!("request to engine failed: {}", e), true)
}

/// Authenticated REST session
pub struct RestEngineSession {
    http: Client,
    api_url: String,
    token: String,
}

impl std::fmt::Debug for RestEngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestEngineSession")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Deserialize)]
struct VmList {
    #[serde(default)]
    vm: Vec<Vm>,
}

impl RestEngineSession {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn api_root(&self) -> Result<Value> {
        let response = self
            .request(reqwest::Method::GET, "")
            .send()
            .await
            .map_err(|e| transport_error(Operation::Query, e))?;
        check_status(response, Operation::Query)
            .await?
            .json()
            .await
            .map_err(|e| Error::serialization_for_kind("Api", e.to_string()))
    }
}

/// JSON body for `POST /vms`
pub(crate) fn vm_body(request: &VmRequest) -> Value {
    let mut vm = Map::new();
    vm.insert("name".into(), json!(request.name));
    vm.insert("cluster".into(), json!({ "id": request.cluster_id }));
    vm.insert("template".into(), json!({ "name": request.template_name }));
    vm.insert("type".into(), json!(request.vm_type));

    if let Some(id) = &request.instance_type_id {
        vm.insert("instance_type".into(), json!({ "id": id }));
    }
    if let Some(memory) = request.memory_mb {
        vm.insert("memory".into(), json!((memory * MIB).to_string()));
    }
    if let Some(guaranteed) = request.guaranteed_memory_mb {
        vm.insert(
            "memory_policy".into(),
            json!({ "guaranteed": (guaranteed * MIB).to_string() }),
        );
    }
    if let Some(cpu) = request.cpu {
        vm.insert(
            "cpu".into(),
            json!({
                "topology": {
                    "sockets": cpu.sockets.to_string(),
                    "cores": cpu.cores.to_string(),
                    "threads": cpu.threads.to_string(),
                }
            }),
        );
    }
    if let Some(hugepages) = request.hugepages.filter(|h| *h > 0) {
        vm.insert(
            "custom_properties".into(),
            json!({
                "custom_property": [{ "name": "hugepages", "value": hugepages.to_string() }]
            }),
        );
    }
    if let Some(script) = &request.user_data {
        vm.insert("initialization".into(), json!({ "custom_script": script }));
    }

    Value::Object(vm)
}

#[async_trait]
impl EngineSession for RestEngineSession {
    async fn test(&self) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, "")
            .send()
            .await
            .map_err(|e| Error::connection(format!("engine liveness probe failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::connection(format!(
                "engine liveness probe returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn system_version(&self) -> Result<EngineVersion> {
        let root = self.api_root().await?;
        let version = root
            .pointer("/product_info/version")
            .ok_or_else(|| Error::serialization_for_kind("Api", "product_info.version missing"))?;
        EngineVersion::from_json(version)
    }

    async fn find_vms_by_name(&self, name: &str) -> Result<Vec<Vm>> {
        let response = self
            .request(reqwest::Method::GET, "/vms")
            .query(&[("search", format!("name={}", name))])
            .send()
            .await
            .map_err(|e| transport_error(Operation::Query, e))?;
        let list: VmList = check_status(response, Operation::Query)
            .await?
            .json()
            .await
            .map_err(|e| Error::serialization_for_kind("VmList", e.to_string()))?;

        // search matches patterns; only exact names count
        Ok(list.vm.into_iter().filter(|vm| vm.name == name).collect())
    }

    async fn create_vm(&self, request: &VmRequest) -> Result<Vm> {
        debug!(vm = %request.name, template = %request.template_name, "Creating VM");
        let mut call = self.request(reqwest::Method::POST, "/vms");
        if let Some(policy) = &request.auto_pinning_policy {
            call = call.query(&[("auto_pinning_policy", policy)]);
        }
        let response = call
            .json(&vm_body(request))
            .send()
            .await
            .map_err(|e| transport_error(Operation::Create, e))?;
        check_status(response, Operation::Create)
            .await?
            .json()
            .await
            .map_err(|e| Error::serialization_for_kind("Vm", e.to_string()))
    }

    async fn start_vm(&self, id: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, &format!("/vms/{}/start", id))
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| transport_error(Operation::Create, e))?;
        check_status(response, Operation::Create).await?;
        Ok(())
    }

    async fn delete_vm(&self, id: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/vms/{}", id))
            .send()
            .await
            .map_err(|e| transport_error(Operation::Delete, e))?;
        check_status(response, Operation::Delete).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CpuTopology;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials_for(server: &MockServer) -> Credentials {
        Credentials {
            url: format!("{}/ovirt-engine/api", server.uri()),
            username: "admin@internal".to_string(),
            password: "topsecret".to_string(),
            ..Default::default()
        }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/ovirt-engine/sso/oauth/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("scope=ovirt-app-api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn session(server: &MockServer) -> Arc<dyn EngineSession> {
        mount_token(server).await;
        RestEngineConnector::default()
            .connect(&credentials_for(server))
            .await
            .unwrap()
    }

    #[test]
    fn token_url_sits_next_to_api_root() {
        assert_eq!(
            token_url("https://engine/ovirt-engine/api"),
            "https://engine/ovirt-engine/sso/oauth/token"
        );
        assert_eq!(token_url("https://engine"), "https://engine/sso/oauth/token");
    }

    #[tokio::test]
    async fn connect_rejects_empty_credentials_before_any_request() {
        let err = RestEngineConnector::default()
            .connect(&Credentials::default())
            .await
            .err().unwrap();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(err.to_string().contains("ovirt_url"));
    }

    #[tokio::test]
    async fn connect_reports_rejected_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ovirt-engine/sso/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "access_denied",
                "error_description": "Cannot authenticate user"
            })))
            .mount(&server)
            .await;

        let err = RestEngineConnector::default()
            .connect(&credentials_for(&server))
            .await
            .err().unwrap();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(err.to_string().contains("Cannot authenticate user"));
    }

    #[tokio::test]
    async fn connect_reports_unreadable_ca_file() {
        let credentials = Credentials {
            url: "https://engine/ovirt-engine/api".to_string(),
            username: "admin@internal".to_string(),
            ca_file: "/nonexistent/ca.pem".to_string(),
            ..Default::default()
        };
        let err = RestEngineConnector::default()
            .connect(&credentials)
            .await
            .err().unwrap();
        assert!(err.to_string().contains("/nonexistent/ca.pem"));
    }

    #[tokio::test]
    async fn liveness_probe_uses_bearer_token() {
        let server = MockServer::start().await;
        let session = session(&server).await;
        Mock::given(method("GET"))
            .and(path("/ovirt-engine/api"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        session.test().await.unwrap();
    }

    #[tokio::test]
    async fn liveness_probe_fails_on_expired_token() {
        let server = MockServer::start().await;
        let session = session(&server).await;
        Mock::given(method("GET"))
            .and(path("/ovirt-engine/api"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(matches!(
            session.test().await.unwrap_err(),
            Error::Connection { .. }
        ));
    }

    #[tokio::test]
    async fn system_version_reads_product_info() {
        let server = MockServer::start().await;
        let session = session(&server).await;
        Mock::given(method("GET"))
            .and(path("/ovirt-engine/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "product_info": {
                    "name": "oVirt Engine",
                    "version": {
                        "build": "5", "full_version": "4.4.5.11-1.el8",
                        "major": "4", "minor": "4", "revision": "11"
                    }
                }
            })))
            .mount(&server)
            .await;

        assert_eq!(
            session.system_version().await.unwrap(),
            EngineVersion::new(4, 4, 5, 11)
        );
    }

    #[tokio::test]
    async fn find_vms_keeps_exact_name_matches_only() {
        let server = MockServer::start().await;
        let session = session(&server).await;
        Mock::given(method("GET"))
            .and(path("/ovirt-engine/api/vms"))
            .and(query_param("search", "name=worker-0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vm": [
                    { "id": "a1", "name": "worker-0", "status": "up" },
                    { "id": "b2", "name": "worker-01", "status": "down" }
                ]
            })))
            .mount(&server)
            .await;

        let vms = session.find_vms_by_name("worker-0").await.unwrap();
        assert_eq!(
            vms,
            vec![Vm {
                id: "a1".to_string(),
                name: "worker-0".to_string(),
                status: "up".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn find_vms_handles_empty_result() {
        let server = MockServer::start().await;
        let session = session(&server).await;
        Mock::given(method("GET"))
            .and(path("/ovirt-engine/api/vms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        assert!(session.find_vms_by_name("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_vm_posts_template_and_sizing() {
        let server = MockServer::start().await;
        let session = session(&server).await;
        Mock::given(method("POST"))
            .and(path("/ovirt-engine/api/vms"))
            .and(query_param("auto_pinning_policy", "adjust"))
            .and(body_partial_json(json!({
                "name": "worker-0",
                "cluster": { "id": "c1" },
                "template": { "name": "rhcos" },
                "type": "high_performance",
                "memory": "17179869184",
                "cpu": { "topology": { "sockets": "1", "cores": "4", "threads": "1" } },
                "custom_properties": {
                    "custom_property": [{ "name": "hugepages", "value": "2048" }]
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "new-id", "name": "worker-0", "status": "image_locked"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = VmRequest {
            name: "worker-0".to_string(),
            cluster_id: "c1".to_string(),
            template_name: "rhcos".to_string(),
            vm_type: "high_performance".to_string(),
            memory_mb: Some(16384),
            cpu: Some(CpuTopology {
                sockets: 1,
                cores: 4,
                threads: 1,
            }),
            auto_pinning_policy: Some("adjust".to_string()),
            hugepages: Some(2048),
            ..Default::default()
        };
        let vm = session.create_vm(&request).await.unwrap();
        assert_eq!(vm.id, "new-id");
    }

    #[tokio::test]
    async fn engine_faults_are_classified() {
        let server = MockServer::start().await;
        let session = session(&server).await;
        Mock::given(method("POST"))
            .and(path("/ovirt-engine/api/vms"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "reason": "Operation Failed",
                "detail": "[Cannot add VM. The given name is already in use.]"
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/ovirt-engine/api/vms/a1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = session.create_vm(&VmRequest::default()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("already in use"));

        let err = session.delete_vm("a1").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            Error::RemoteOperation {
                operation: Operation::Delete,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn start_vm_posts_action() {
        let server = MockServer::start().await;
        let session = session(&server).await;
        Mock::given(method("POST"))
            .and(path("/ovirt-engine/api/vms/a1/start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "complete" })))
            .expect(1)
            .mount(&server)
            .await;

        session.start_vm("a1").await.unwrap();
    }

    #[test]
    fn vm_body_omits_unset_sizing() {
        let body = vm_body(&VmRequest {
            name: "w".to_string(),
            instance_type_id: Some("it-1".to_string()),
            hugepages: Some(0),
            ..Default::default()
        });
        assert_eq!(body["instance_type"]["id"], "it-1");
        assert!(body.get("memory").is_none());
        assert!(body.get("cpu").is_none());
        assert!(body.get("custom_properties").is_none());
    }
}

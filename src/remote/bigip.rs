//! F5 BIG-IP iControl REST implementation of [`RemoteStore`]
//!
//! iFiles live in two places on a BIG-IP: the system file object
//! (`sys file ifile`), which owns the content and its checksum, and the LTM
//! object (`ltm ifile`) that iRules reference. Every mutation touches both.
//! Content is staged through the file-transfer upload endpoint first, which
//! is not transactional; the object changes themselves run inside an
//! iControl REST transaction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{RemoteFileRecord, RemoteStore, Transaction};
use crate::config::BigIpConfig;
use crate::error::{Result, SyncError};

const AUTH_TOKEN_HEADER: &str = "X-F5-Auth-Token";
const COORDINATION_HEADER: &str = "X-F5-REST-Coordination-Id";

/// Where the file-transfer endpoint stores uploaded content on the device
const DOWNLOADS_DIR: &str = "/var/config/rest/downloads";

/// Kept under the 1 MiB request limit of the file-transfer endpoint
const UPLOAD_CHUNK_SIZE: usize = 512 * 1024;

/// BIG-IP tokens expire after 20 minutes by default
const TOKEN_LIFETIME: Duration = Duration::from_secs(19 * 60);

/// Failure talking to the iControl REST API
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("{0}")]
    Protocol(String),
}

#[derive(Debug, Clone)]
enum AuthMode {
    Basic,
    Token { login_provider_name: String },
}

struct CachedToken {
    value: String,
    obtained: Instant,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    auth: AuthMode,
    partition: String,
    token: Mutex<Option<CachedToken>>,
}

/// iControl REST client, cheap to clone and shared by scanner and watchers
#[derive(Clone)]
pub struct BigIpClient {
    inner: Arc<Inner>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: LoginToken,
}

#[derive(Deserialize)]
struct LoginToken {
    token: String,
}

#[derive(Deserialize)]
struct IFileList {
    #[serde(default)]
    items: Vec<IFileItem>,
}

#[derive(Deserialize)]
struct IFileItem {
    name: String,
    #[serde(default)]
    checksum: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionResponse {
    trans_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    state: Option<String>,
    failure_reason: Option<String>,
}

impl BigIpClient {
    /// Build a client from configuration, resolving the password and, for
    /// token authentication, logging in once to validate the credentials.
    pub async fn connect(config: &BigIpConfig) -> anyhow::Result<Self> {
        let password = config.resolve_password()?;
        let client = Self::new(config, password)?;

        if let AuthMode::Token { .. } = client.inner.auth {
            client
                .auth_token()
                .await
                .with_context(|| format!("Failed to log in to {}", client.inner.base_url))?;
        }

        info!(
            "Using BIG-IP at {} ({} authentication)",
            client.inner.base_url, config.auth_method
        );
        Ok(client)
    }

    /// Build a client without contacting the device
    pub fn new(config: &BigIpConfig, password: String) -> anyhow::Result<Self> {
        let auth = match config.auth_method.as_str() {
            "basic" => AuthMode::Basic,
            "token" => AuthMode::Token {
                login_provider_name: config.login_provider_name.clone(),
            },
            other => return Err(anyhow!("unsupported auth method {:?}", other)),
        };

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.ssl_check)
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: config.url.trim_end_matches('/').to_string(),
                user: config.user.clone(),
                password,
                auth,
                partition: config.partition.clone(),
                token: Mutex::new(None),
            }),
        })
    }

    async fn login(&self, login_provider_name: &str) -> std::result::Result<String, ApiError> {
        debug!("Requesting authentication token for {}", self.inner.user);

        let request = self
            .inner
            .http
            .post(format!("{}/mgmt/shared/authn/login", self.inner.base_url))
            .json(&json!({
                "username": self.inner.user,
                "password": self.inner.password,
                "loginProviderName": login_provider_name,
            }));

        let response = check(request.send().await?)
            .await?
            .json::<LoginResponse>()
            .await?;
        Ok(response.token.token)
    }

    async fn auth_token(&self) -> std::result::Result<String, ApiError> {
        let AuthMode::Token {
            login_provider_name,
        } = &self.inner.auth
        else {
            return Err(ApiError::Protocol(
                "token requested with basic authentication".to_string(),
            ));
        };

        let mut cached = self.inner.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.obtained.elapsed() < TOKEN_LIFETIME {
                return Ok(token.value.clone());
            }
        }

        let value = self.login(login_provider_name).await?;
        *cached = Some(CachedToken {
            value: value.clone(),
            obtained: Instant::now(),
        });
        Ok(value)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        trans_id: Option<i64>,
    ) -> std::result::Result<RequestBuilder, ApiError> {
        let url = format!("{}{}", self.inner.base_url, path);
        let mut request = self.inner.http.request(method, url);

        request = match &self.inner.auth {
            AuthMode::Basic => request.basic_auth(&self.inner.user, Some(&self.inner.password)),
            AuthMode::Token { .. } => request.header(AUTH_TOKEN_HEADER, self.auth_token().await?),
        };

        if let Some(id) = trans_id {
            request = request.header(COORDINATION_HEADER, id.to_string());
        }

        Ok(request)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        trans_id: Option<i64>,
        body: Option<serde_json::Value>,
    ) -> std::result::Result<Response, ApiError> {
        let mut request = self.request(method, path, trans_id).await?;
        if let Some(body) = body {
            request = request.json(&body);
        }
        check(request.send().await?).await
    }

    /// Stage file content on the device in chunks
    async fn upload(&self, name: &str, content: &[u8], size: u64) -> std::result::Result<(), ApiError> {
        let path = format!("/mgmt/shared/file-transfer/uploads/{}", name);

        if content.is_empty() {
            let request = self.request(Method::POST, &path, None).await?;
            check(
                request
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .header(reqwest::header::CONTENT_RANGE, "0-0/0")
                    .body(Vec::new())
                    .send()
                    .await?,
            )
            .await?;
            return Ok(());
        }

        for (start, chunk) in content_chunks(content) {
            let end = start + chunk.len() - 1;
            let request = self.request(Method::POST, &path, None).await?;
            check(
                request
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .header(
                        reqwest::header::CONTENT_RANGE,
                        format!("{}-{}/{}", start, end, size),
                    )
                    .body(chunk.to_vec())
                    .send()
                    .await?,
            )
            .await?;
        }

        debug!("Uploaded {} bytes for {}", size, name);
        Ok(())
    }

    fn object_path(&self, collection: &str, name: &str) -> String {
        format!("{}/~{}~{}", collection, self.inner.partition, name)
    }

    fn source_path(name: &str) -> String {
        format!("file:{}/{}", DOWNLOADS_DIR, name)
    }

    fn full_name(&self, name: &str) -> String {
        format!("/{}/{}", self.inner.partition, name)
    }
}

#[async_trait]
impl RemoteStore for BigIpClient {
    async fn list_records(&self) -> Result<Vec<RemoteFileRecord>> {
        let list = async {
            let response = self
                .send(Method::GET, "/mgmt/tm/sys/file/ifile", None, None)
                .await?;
            Ok::<_, ApiError>(response.json::<IFileList>().await?)
        }
        .await
        .map_err(|e| SyncError::RemoteList(e.to_string()))?;

        Ok(list
            .items
            .into_iter()
            .map(|item| RemoteFileRecord::new(base_name(&item.name), item.checksum))
            .collect())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        let response = async {
            let response = self
                .send(Method::POST, "/mgmt/tm/transaction", None, Some(json!({})))
                .await?;
            Ok::<_, ApiError>(response.json::<TransactionResponse>().await?)
        }
        .await
        .map_err(|e| SyncError::TransactionOpen(e.to_string()))?;

        debug!("Opened transaction {}", response.trans_id);
        Ok(Box::new(BigIpTransaction {
            client: self.clone(),
            id: response.trans_id,
        }))
    }
}

/// An open iControl REST transaction
pub struct BigIpTransaction {
    client: BigIpClient,
    id: i64,
}

impl BigIpTransaction {
    async fn create(&self, name: &str, content: &[u8], size: u64) -> std::result::Result<(), ApiError> {
        let client = &self.client;
        client.upload(name, content, size).await?;
        client
            .send(
                Method::POST,
                "/mgmt/tm/sys/file/ifile",
                Some(self.id),
                Some(json!({ "name": name, "source-path": BigIpClient::source_path(name) })),
            )
            .await?;
        client
            .send(
                Method::POST,
                "/mgmt/tm/ltm/ifile",
                Some(self.id),
                Some(json!({ "name": name, "file-name": client.full_name(name) })),
            )
            .await?;
        Ok(())
    }

    async fn update(&self, name: &str, content: &[u8], size: u64) -> std::result::Result<(), ApiError> {
        let client = &self.client;
        client.upload(name, content, size).await?;
        client
            .send(
                Method::PUT,
                &client.object_path("/mgmt/tm/sys/file/ifile", name),
                Some(self.id),
                Some(json!({ "source-path": BigIpClient::source_path(name) })),
            )
            .await?;
        client
            .send(
                Method::PUT,
                &client.object_path("/mgmt/tm/ltm/ifile", name),
                Some(self.id),
                Some(json!({ "file-name": client.full_name(name) })),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> std::result::Result<(), ApiError> {
        let client = &self.client;
        // The LTM object references the system file and must go first.
        client
            .send(
                Method::DELETE,
                &client.object_path("/mgmt/tm/ltm/ifile", name),
                Some(self.id),
                None,
            )
            .await?;
        client
            .send(
                Method::DELETE,
                &client.object_path("/mgmt/tm/sys/file/ifile", name),
                Some(self.id),
                None,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for BigIpTransaction {
    async fn create_from_file(&mut self, name: &str, content: Vec<u8>, size: u64) -> Result<()> {
        self.create(name, &content, size)
            .await
            .map_err(|e| SyncError::upload(name, e.to_string()))
    }

    async fn update_from_file(&mut self, name: &str, content: Vec<u8>, size: u64) -> Result<()> {
        self.update(name, &content, size)
            .await
            .map_err(|e| SyncError::upload(name, e.to_string()))
    }

    async fn delete_by_name(&mut self, name: &str) -> Result<()> {
        self.delete(name)
            .await
            .map_err(|e| SyncError::delete(name, e.to_string()))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let path = format!("/mgmt/tm/transaction/{}", self.id);
        let response = async {
            // The commit itself must not carry the coordination header.
            let response = self
                .client
                .send(Method::PATCH, &path, None, Some(json!({ "state": "VALIDATING" })))
                .await?;
            Ok::<_, ApiError>(response.json::<CommitResponse>().await?)
        }
        .await
        .map_err(|e| SyncError::Commit(e.to_string()))?;

        match response.state.as_deref() {
            None | Some("COMPLETED") => {
                debug!("Committed transaction {}", self.id);
                Ok(())
            }
            Some(state) => Err(SyncError::Commit(format!(
                "transaction {} ended in state {}: {}",
                self.id,
                state,
                response.failure_reason.unwrap_or_default()
            ))),
        }
    }
}

/// Turn a non-2xx response into an error carrying BIG-IP's message
async fn check(response: Response) -> std::result::Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or(body);

    Err(ApiError::Status { status, message })
}

fn base_name(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).to_string()
}

fn content_chunks(content: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    content
        .chunks(UPLOAD_CHUNK_SIZE)
        .enumerate()
        .map(|(i, chunk)| (i * UPLOAD_CHUNK_SIZE, chunk))
}

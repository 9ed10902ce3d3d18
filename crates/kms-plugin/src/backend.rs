// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Narrow Vault capability used by the session
//!
//! The session never sees a full Vault client. It gets logical `read` and
//! `write` on paths plus `login`, which is all the plugin needs. Failures are
//! reported as raw text in the Vault API error layout and left to
//! [`crate::classify`] to interpret.

use crate::config::{AuthMethodKind, PluginConfig};
use crate::error::{KmsError, Result};
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

/// Raw failure text from the Vault transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct RawVaultError(pub String);

impl RawVaultError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type BackendResult<T> = std::result::Result<T, RawVaultError>;

/// How an operation touches its path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultMethod {
    Read,
    Write,
}

/// A single backend call: method, logical path and payload
#[derive(Clone, PartialEq)]
pub struct VaultOperation {
    pub method: VaultMethod,
    pub path: String,
    pub payload: Option<Value>,
}

impl VaultOperation {
    pub fn read(path: impl Into<String>) -> Self {
        Self {
            method: VaultMethod::Read,
            path: path.into(),
            payload: None,
        }
    }

    pub fn write(path: impl Into<String>, payload: Value) -> Self {
        Self {
            method: VaultMethod::Write,
            path: path.into(),
            payload: Some(payload),
        }
    }

    /// Run the operation once against `backend`
    pub async fn execute(&self, backend: &dyn VaultBackend) -> BackendResult<Option<Value>> {
        match self.method {
            VaultMethod::Read => backend.read(&self.path).await,
            VaultMethod::Write => backend.write(&self.path, self.payload.as_ref()).await,
        }
    }
}

// payloads carry plaintext and ciphertext, keep them out of logs
impl fmt::Debug for VaultOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultOperation")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("payload", &self.payload.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Auth method descriptor, fixed for the life of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Kubernetes auth, the service account JWT is read on every login
    Kubernetes { role: String, mount: String, jwt_path: PathBuf },
    /// TLS certificate auth, the client identity lives in the HTTP client
    Cert { role: String, mount: String },
}

impl AuthMethod {
    pub fn from_config(config: &PluginConfig) -> Result<Self> {
        let mount = config.auth_mount()?;
        let role = config.vault_role.clone();
        Ok(match config.auth_kind()? {
            AuthMethodKind::Kubernetes => AuthMethod::Kubernetes {
                role,
                mount,
                jwt_path: config.jwt_path.clone(),
            },
            AuthMethodKind::Cert => AuthMethod::Cert { role, mount },
        })
    }

    pub fn kind(&self) -> AuthMethodKind {
        match self {
            AuthMethod::Kubernetes { .. } => AuthMethodKind::Kubernetes,
            AuthMethod::Cert { .. } => AuthMethodKind::Cert,
        }
    }

    pub fn role(&self) -> &str {
        match self {
            AuthMethod::Kubernetes { role, .. } | AuthMethod::Cert { role, .. } => role,
        }
    }

    pub fn login_path(&self) -> String {
        match self {
            AuthMethod::Kubernetes { mount, .. } | AuthMethod::Cert { mount, .. } => format!("auth/{mount}/login"),
        }
    }

    /// Body of the login request
    pub async fn login_payload(&self) -> std::io::Result<Value> {
        match self {
            AuthMethod::Kubernetes { role, jwt_path, .. } => {
                let jwt = tokio::fs::read_to_string(jwt_path).await?;
                Ok(json!({ "role": role, "jwt": jwt.trim() }))
            }
            AuthMethod::Cert { role, .. } => Ok(json!({ "name": role })),
        }
    }
}

/// Credential returned by a successful login
#[derive(Clone, Deserialize)]
pub struct AuthInfo {
    pub client_token: String,
    #[serde(default)]
    pub accessor: String,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
}

impl fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInfo")
            .field("client_token", &"<redacted>")
            .field("accessor", &self.accessor)
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .finish()
    }
}

/// Logical Vault access
///
/// `read` and `write` return the `data` object of the response, `None` when
/// Vault answered without one. `login` installs the new token on success so
/// every later call uses it.
#[async_trait]
pub trait VaultBackend: Send + Sync + fmt::Debug {
    async fn read(&self, path: &str) -> BackendResult<Option<Value>>;

    async fn write(&self, path: &str, payload: Option<&Value>) -> BackendResult<Option<Value>>;

    async fn login(&self, auth: &AuthMethod) -> BackendResult<AuthInfo>;
}

/// Render a Vault API failure in the layout the Vault client libraries use
pub fn format_api_error(
    namespace: Option<&str>,
    method: &str,
    url: &str,
    status_code: u16,
    errors: &[String],
    raw_body: Option<&str>,
) -> String {
    let ns = namespace.map(|ns| format!("Namespace: {ns}\n")).unwrap_or_default();
    let (label, body) = match raw_body {
        Some(raw) => ("Raw Message", raw.to_string()),
        None => (
            "Errors",
            errors.iter().map(|e| format!("* {e}")).collect::<Vec<_>>().join("\n"),
        ),
    };
    format!("Error making API request.\n\n{ns}URL: {method} {url}\nCode: {status_code}. {label}:\n\n{body}")
}

#[derive(Deserialize, Default)]
struct ResponseBody {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    auth: Option<AuthInfo>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

/// [`VaultBackend`] over the Vault HTTP API
pub struct HttpVaultBackend {
    client: Client,
    address: String,
    namespace: Option<String>,
    token: RwLock<Option<String>>,
}

impl HttpVaultBackend {
    /// Create a new HTTP backend from the plugin configuration
    pub fn new(config: &PluginConfig) -> Result<Self> {
        let tls = config.tls();
        let mut builder = Client::builder().timeout(config.timeout());

        if let Some(ca_path) = &tls.ca_cert_path {
            let pem = std::fs::read(ca_path)
                .map_err(|e| KmsError::configuration_error(format!("failed to read CA certificate {}: {e}", ca_path.display())))?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }

        if let (Some(cert_path), Some(key_path)) = (&tls.client_cert_path, &tls.client_key_path) {
            let mut pem = std::fs::read(cert_path).map_err(|e| {
                KmsError::configuration_error(format!("failed to read client certificate {}: {e}", cert_path.display()))
            })?;
            let key = std::fs::read(key_path)
                .map_err(|e| KmsError::configuration_error(format!("failed to read client key {}: {e}", key_path.display())))?;
            pem.push(b'\n');
            pem.extend_from_slice(&key);
            builder = builder.identity(Identity::from_pem(&pem)?);
        }

        if tls.skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            client: builder.build()?,
            address: config.address.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path.trim_start_matches('/'))
    }

    fn current_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_token(&self, token: String) {
        match self.token.write() {
            Ok(mut guard) => *guard = Some(token),
            Err(poisoned) => *poisoned.into_inner() = Some(token),
        }
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>, authenticated: bool) -> BackendResult<ResponseBody> {
        let url = self.url(path);
        let mut builder = self.client.request(method.clone(), &url);
        if authenticated {
            if let Some(token) = self.current_token() {
                builder = builder.header("X-Vault-Token", token);
            }
        }
        if let Some(namespace) = &self.namespace {
            builder = builder.header("X-Vault-Namespace", namespace);
        }
        if let Some(payload) = body {
            builder = builder.json(payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RawVaultError::new(format!("{method} {url}: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RawVaultError::new(format!("{method} {url}: failed to read response body: {e}")))?;

        debug!(method = %method, path, status = status.as_u16(), "vault request completed");

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(ResponseBody::default());
            }
            return serde_json::from_str(&text)
                .map_err(|e| RawVaultError::new(format!("{method} {url}: failed to decode response: {e}")));
        }

        let errors = serde_json::from_str::<ErrorBody>(&text).map(|b| b.errors);
        if status == StatusCode::NOT_FOUND && matches!(&errors, Ok(errs) if errs.is_empty()) {
            return Ok(ResponseBody::default());
        }

        let message = match errors {
            Ok(errs) if !errs.is_empty() => {
                format_api_error(self.namespace.as_deref(), method.as_str(), &url, status.as_u16(), &errs, None)
            }
            _ => format_api_error(
                self.namespace.as_deref(),
                method.as_str(),
                &url,
                status.as_u16(),
                &[],
                Some(text.trim()),
            ),
        };
        Err(RawVaultError::new(message))
    }
}

impl fmt::Debug for HttpVaultBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpVaultBackend")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("client", &"reqwest::Client")
            .finish()
    }
}

#[async_trait]
impl VaultBackend for HttpVaultBackend {
    async fn read(&self, path: &str) -> BackendResult<Option<Value>> {
        Ok(self.request(Method::GET, path, None, true).await?.data)
    }

    async fn write(&self, path: &str, payload: Option<&Value>) -> BackendResult<Option<Value>> {
        Ok(self.request(Method::PUT, path, payload, true).await?.data)
    }

    async fn login(&self, auth: &AuthMethod) -> BackendResult<AuthInfo> {
        let payload = auth
            .login_payload()
            .await
            .map_err(|e| RawVaultError::new(format!("failed to build {:?} login request: {e}", auth.kind())))?;
        let response = self.request(Method::PUT, &auth.login_path(), Some(&payload), false).await?;
        let info = response
            .auth
            .filter(|info| !info.client_token.is_empty())
            .ok_or_else(|| RawVaultError::new(format!("no auth info was returned after login at {}", auth.login_path())))?;
        self.set_token(info.client_token.clone());
        Ok(info)
    }
}

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

//! KMS plugin configuration management

use crate::error::{KmsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_TRANSIT_PATH: &str = "transit";
pub const DEFAULT_JWT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 150;
pub const DEFAULT_RENEW_THRESHOLD: f64 = 0.667;

/// Vault authentication methods the plugin can log in with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethodKind {
    /// Kubernetes service account token
    Kubernetes,
    /// TLS client certificate
    Cert,
}

impl AuthMethodKind {
    /// Mount the method is enabled at when `authpath` is not set
    pub fn default_mount(&self) -> &'static str {
        match self {
            AuthMethodKind::Kubernetes => "kubernetes",
            AuthMethodKind::Cert => "cert",
        }
    }
}

impl FromStr for AuthMethodKind {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "k8s" => Ok(AuthMethodKind::Kubernetes),
            "cert" => Ok(AuthMethodKind::Cert),
            other => Err(KmsError::configuration_error(format!("Unsupported auth method: {other}"))),
        }
    }
}

/// TLS material for reaching Vault
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to CA certificate file
    pub ca_cert_path: Option<PathBuf>,
    /// Path to client certificate file
    pub client_cert_path: Option<PathBuf>,
    /// Path to client private key file
    pub client_key_path: Option<PathBuf>,
    /// Skip TLS verification (insecure, for development only)
    pub skip_verify: bool,
}

/// Provider configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Vault server URL
    pub address: String,
    /// Transit key name
    #[serde(rename = "transitkey")]
    pub transit_key: String,
    /// Role to log in as
    #[serde(rename = "vaultrole", default)]
    pub vault_role: String,
    /// Vault namespace (Vault Enterprise)
    #[serde(default)]
    pub namespace: Option<String>,
    /// Auth method mount, with or without the `auth/` prefix
    #[serde(rename = "authpath", default)]
    pub auth_path: Option<String>,
    /// Transit engine mount
    #[serde(rename = "transitpath", default = "default_transit_path")]
    pub transit_path: String,
    /// `k8s` or `cert`
    #[serde(rename = "authmethod", default = "default_auth_method")]
    pub auth_method: String,
    #[serde(rename = "jwtpath", default = "default_jwt_path")]
    pub jwt_path: PathBuf,
    #[serde(rename = "cacert", default)]
    pub ca_cert: Option<PathBuf>,
    #[serde(rename = "clientcert", default)]
    pub client_cert: Option<PathBuf>,
    #[serde(rename = "clientkey", default)]
    pub client_key: Option<PathBuf>,
    #[serde(rename = "tlsskipverify", default)]
    pub tls_skip_verify: bool,
    /// HTTP timeout per Vault request
    #[serde(rename = "timeoutsecs", default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(rename = "retryattempts", default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(rename = "retrydelayms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Fraction of the granted TTL that may elapse before the token is renewed
    #[serde(rename = "renewthreshold", default = "default_renew_threshold")]
    pub renew_threshold: f64,
    /// Reject decrypt requests whose key ID is not the current one
    #[serde(rename = "strictkeyid", default)]
    pub strict_key_id: bool,
}

fn default_transit_path() -> String {
    DEFAULT_TRANSIT_PATH.to_string()
}

fn default_auth_method() -> String {
    "k8s".to_string()
}

fn default_jwt_path() -> PathBuf {
    PathBuf::from(DEFAULT_JWT_PATH)
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_renew_threshold() -> f64 {
    DEFAULT_RENEW_THRESHOLD
}

impl PluginConfig {
    /// Minimal configuration for a Kubernetes-authenticated plugin
    pub fn new(address: impl Into<String>, transit_key: impl Into<String>, vault_role: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            transit_key: transit_key.into(),
            vault_role: vault_role.into(),
            namespace: None,
            auth_path: None,
            transit_path: default_transit_path(),
            auth_method: default_auth_method(),
            jwt_path: default_jwt_path(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            tls_skip_verify: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            renew_threshold: DEFAULT_RENEW_THRESHOLD,
            strict_key_id: false,
        }
    }

    /// Read, complete from the environment, and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KmsError::configuration_error(format!("failed to read config file {}: {e}", path.display())))?;
        let mut config = Self::from_json(&raw)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration JSON without validating it
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config: Self =
            serde_json::from_str(raw).map_err(|e| KmsError::configuration_error(format!("malformed config file: {e}")))?;
        if config.namespace.as_deref().is_some_and(|ns| ns.trim().is_empty()) {
            config.namespace = None;
        }
        Ok(config)
    }

    /// Fill unset TLS settings from the standard Vault client variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.ca_cert.is_none() {
            self.ca_cert = lookup("VAULT_CACERT").filter(|v| !v.is_empty()).map(PathBuf::from);
        }
        if self.client_cert.is_none() {
            self.client_cert = lookup("VAULT_CLIENT_CERT").filter(|v| !v.is_empty()).map(PathBuf::from);
        }
        if self.client_key.is_none() {
            self.client_key = lookup("VAULT_CLIENT_KEY").filter(|v| !v.is_empty()).map(PathBuf::from);
        }
        if !self.tls_skip_verify {
            self.tls_skip_verify = lookup("VAULT_SKIP_VERIFY").is_some_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE"));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.address)
            .map_err(|e| KmsError::configuration_error(format!("invalid Vault address {}: {e}", self.address)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(KmsError::configuration_error("Vault address must use http or https scheme"));
        }

        if self.transit_key.trim().is_empty() {
            return Err(KmsError::configuration_error("transitkey cannot be empty"));
        }
        if self.transit_path.trim_matches('/').is_empty() {
            return Err(KmsError::configuration_error("transitpath cannot be empty"));
        }
        if self.vault_role.trim().is_empty() {
            return Err(KmsError::configuration_error("vaultrole cannot be empty"));
        }

        let kind = self.auth_kind()?;
        if kind == AuthMethodKind::Cert && (self.client_cert.is_none() || self.client_key.is_none()) {
            return Err(KmsError::configuration_error(
                "cert auth requires clientcert and clientkey (or VAULT_CLIENT_CERT and VAULT_CLIENT_KEY)",
            ));
        }

        if self.timeout_secs == 0 {
            return Err(KmsError::configuration_error("Timeout must be greater than 0"));
        }
        if self.retry_attempts == 0 {
            return Err(KmsError::configuration_error("Retry attempts must be greater than 0"));
        }
        if !(self.renew_threshold > 0.0 && self.renew_threshold < 1.0) {
            return Err(KmsError::configuration_error("renewthreshold must be between 0 and 1"));
        }

        if url.scheme() == "https" && self.tls_skip_verify {
            tracing::warn!("TLS verification is disabled for Vault at {}", self.address);
        }

        Ok(())
    }

    pub fn auth_kind(&self) -> Result<AuthMethodKind> {
        self.auth_method.parse()
    }

    /// Auth mount without the `auth/` prefix
    pub fn auth_mount(&self) -> Result<String> {
        let kind = self.auth_kind()?;
        let mount = self
            .auth_path
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .map(|p| if p == "auth" { "" } else { p.strip_prefix("auth/").unwrap_or(p) })
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .unwrap_or(kind.default_mount());
        Ok(mount.to_string())
    }

    /// Transit mount without surrounding slashes
    pub fn transit_mount(&self) -> &str {
        self.transit_path.trim_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn tls(&self) -> TlsConfig {
        TlsConfig {
            ca_cert_path: self.ca_cert.clone(),
            client_cert_path: self.client_cert.clone(),
            client_key_path: self.client_key.clone(),
            skip_verify: self.tls_skip_verify,
        }
    }
}

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

//! Vault transit provider for the KMS v2 plugin
//!
//! [`VaultProvider`] serves Encrypt, Decrypt and Status on top of one
//! long-lived [`Session`]. Per-request failures are returned to the caller.
//! Failures that make the session untrustworthy are returned too, and also
//! cancel the token from [`VaultProvider::fatal_signal`] so the host can
//! stop serving.

use crate::backend::{VaultBackend, VaultOperation};
use crate::config::PluginConfig;
use crate::context::RequestContext;
use crate::error::{KmsError, Result};
use crate::key_version::KeyVersionTracker;
use crate::service::KmsService;
use crate::session::Session;
use crate::types::{DecryptRequest, EncryptResponse, StatusResponse, default_annotations, validate_annotations};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Plaintext of the encrypt/decrypt self test
pub const HEALTH_MARKER: &str = "healthy";

pub struct VaultProvider {
    session: Session,
    tracker: KeyVersionTracker,
    strict_key_id: bool,
    fatal: CancellationToken,
}

impl std::fmt::Debug for VaultProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultProvider")
            .field("session", &self.session)
            .field("strict_key_id", &self.strict_key_id)
            .field("fatal", &self.fatal.is_cancelled())
            .finish()
    }
}

impl VaultProvider {
    /// Log in to Vault over HTTP and prepare the provider for serving
    pub async fn open(ctx: &RequestContext, config: &PluginConfig) -> Result<Self> {
        let session = Session::open(ctx, config).await?;
        Self::start(ctx, config, session).await
    }

    /// Same as [`VaultProvider::open`] on a caller supplied backend
    pub async fn with_backend(ctx: &RequestContext, config: &PluginConfig, backend: Arc<dyn VaultBackend>) -> Result<Self> {
        let session = Session::with_backend(ctx, config, backend).await?;
        Self::start(ctx, config, session).await
    }

    async fn start(ctx: &RequestContext, config: &PluginConfig, session: Session) -> Result<Self> {
        let provider = Self {
            session,
            tracker: KeyVersionTracker::default(),
            strict_key_id: config.strict_key_id,
            fatal: CancellationToken::new(),
        };

        let key_id = provider.refresh_key_id(ctx).await?;
        provider.session.check_token_validity(ctx).await?;

        info!(
            transit_key = provider.session.transit_key(),
            key_id = %key_id,
            strict_key_id = provider.strict_key_id,
            "vault kms provider ready"
        );
        Ok(provider)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Cancelled once a fatal error has been observed
    pub fn fatal_signal(&self) -> CancellationToken {
        self.fatal.clone()
    }

    pub fn current_key_id(&self) -> String {
        self.session.current_key_id()
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() && !self.fatal.is_cancelled() {
                error!(error = %err, "fatal vault session failure, provider must stop serving");
                self.fatal.cancel();
            }
        }
        result
    }

    async fn refresh_key_id(&self, ctx: &RequestContext) -> Result<String> {
        let (key_id, _) = self.tracker.fetch_latest_key_id(ctx, &self.session).await?;
        self.session.set_key_id(key_id.clone());
        Ok(key_id)
    }

    /// Token check followed by an encrypt/decrypt round trip of [`HEALTH_MARKER`]
    pub async fn health(&self, ctx: &RequestContext) -> Result<()> {
        let result = self.check_health(ctx).await;
        self.observe(result)
    }

    async fn check_health(&self, ctx: &RequestContext) -> Result<()> {
        self.session.check_token_validity(ctx).await?;

        let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
        let encrypted = self
            .encrypt_inner(ctx, &format!("health-enc-{now}"), HEALTH_MARKER.as_bytes())
            .await?;
        let request = DecryptRequest::from_encrypt_response(&encrypted);
        let decrypted = self.decrypt_inner(ctx, &format!("health-dec-{now}"), &request).await?;

        if decrypted != HEALTH_MARKER.as_bytes() {
            return Err(KmsError::health_check_failed("decrypted health marker does not match"));
        }
        debug!("health check passed");
        Ok(())
    }

    async fn encrypt_inner(&self, ctx: &RequestContext, uid: &str, plaintext: &[u8]) -> Result<EncryptResponse> {
        debug!(uid, "encrypt request");
        let payload = json!({ "plaintext": STANDARD.encode(plaintext) });
        let data = self
            .session
            .execute(ctx, &VaultOperation::write(self.session.encrypt_path(), payload))
            .await?;

        let ciphertext = string_field(data.as_ref(), "ciphertext")?;
        Ok(EncryptResponse {
            ciphertext: ciphertext.into_bytes(),
            key_id: self.session.current_key_id(),
            annotations: default_annotations(),
        })
    }

    async fn decrypt_inner(&self, ctx: &RequestContext, uid: &str, request: &DecryptRequest) -> Result<Vec<u8>> {
        debug!(uid, key_id = %request.key_id, "decrypt request");
        validate_annotations(&request.annotations)?;

        if self.strict_key_id {
            let current = self.session.current_key_id();
            if request.key_id != current {
                return Err(KmsError::KeyIdMismatch {
                    expected: current,
                    actual: request.key_id.clone(),
                });
            }
        }

        let ciphertext = std::str::from_utf8(&request.ciphertext).map_err(|e| KmsError::InvalidCiphertext {
            message: format!("ciphertext is not valid UTF-8: {e}"),
        })?;
        let payload = json!({ "ciphertext": ciphertext });
        let data = self
            .session
            .execute(ctx, &VaultOperation::write(self.session.decrypt_path(), payload))
            .await?;

        let encoded = string_field(data.as_ref(), "plaintext")?;
        Ok(STANDARD.decode(encoded)?)
    }
}

fn string_field(data: Option<&Value>, field: &str) -> Result<String> {
    data.and_then(|d| d.get(field))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| KmsError::invalid_response(format!("response has no string field {field}")))
}

#[async_trait]
impl KmsService for VaultProvider {
    async fn encrypt(&self, ctx: &RequestContext, uid: &str, plaintext: &[u8]) -> Result<EncryptResponse> {
        let result = self.encrypt_inner(ctx, uid, plaintext).await;
        self.observe(result)
    }

    async fn decrypt(&self, ctx: &RequestContext, uid: &str, request: &DecryptRequest) -> Result<Vec<u8>> {
        let result = self.decrypt_inner(ctx, uid, request).await;
        self.observe(result)
    }

    async fn status(&self, ctx: &RequestContext) -> Result<StatusResponse> {
        let previous = self.session.current_key_id();
        let healthy = match self.refresh_key_id(ctx).await {
            Ok(key_id) => {
                debug!(previous = %previous, current = %key_id, "status refreshed key id");
                self.check_health(ctx).await
            }
            Err(err) => Err(err),
        };

        match self.observe(healthy) {
            Ok(()) => Ok(StatusResponse::new(true, self.session.current_key_id())),
            Err(err) if err.is_fatal() || err.is_context_error() => Err(err),
            Err(err) => {
                warn!(error = %err, "status check unhealthy");
                Ok(StatusResponse::new(false, self.session.current_key_id()))
            }
        }
    }
}

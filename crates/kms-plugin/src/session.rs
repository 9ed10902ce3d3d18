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

//! Authenticated Vault session and token lifecycle
//!
//! A [`Session`] is created once at startup and lives for the whole process.
//! It owns the backend handle and the auth method descriptor, checks the
//! token on demand, renews it before it runs out and logs in again when the
//! retry loop reports that Vault no longer accepts it.

use crate::backend::{AuthMethod, HttpVaultBackend, VaultBackend, VaultOperation};
use crate::config::{DEFAULT_RENEW_THRESHOLD, PluginConfig};
use crate::context::RequestContext;
use crate::error::{KmsError, Result};
use crate::retry::{Relogin, RetryPolicy};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const TOKEN_LOOKUP_SELF_PATH: &str = "auth/token/lookup-self";
const TOKEN_RENEW_SELF_PATH: &str = "auth/token/renew-self";

/// What to do with the current token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAction {
    Keep,
    Renew,
}

/// Remaining and granted lifetime of the session token, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenState {
    pub ttl: i64,
    pub creation_ttl: i64,
}

impl TokenState {
    /// Extract the TTLs from a `lookup-self` response
    pub fn from_lookup(data: &Value) -> Result<Self> {
        Ok(Self {
            ttl: seconds_field(data, "ttl")?,
            creation_ttl: seconds_field(data, "creation_ttl")?,
        })
    }
}

fn seconds_field(data: &Value, field: &str) -> Result<i64> {
    let value = data
        .get(field)
        .ok_or_else(|| KmsError::invalid_response(format!("token lookup has no {field}")))?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| KmsError::invalid_response(format!("token lookup {field} is not a number: {value}")))
}

/// When to renew, as the fraction of the granted TTL allowed to elapse
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenewalPolicy {
    pub elapsed_threshold: f64,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            elapsed_threshold: DEFAULT_RENEW_THRESHOLD,
        }
    }
}

impl RenewalPolicy {
    pub fn new(elapsed_threshold: f64) -> Self {
        Self { elapsed_threshold }
    }

    /// Decide what to do with a token, or report a broken TTL invariant
    pub fn evaluate(&self, state: TokenState) -> Result<TokenAction> {
        let TokenState { ttl, creation_ttl } = state;
        if ttl <= 0 || ttl > creation_ttl {
            return Err(KmsError::TokenInvariantViolation { ttl, creation_ttl });
        }

        let allowed_elapsed = (creation_ttl as f64 * self.elapsed_threshold).floor() as i64;
        if ttl <= creation_ttl - allowed_elapsed {
            Ok(TokenAction::Renew)
        } else {
            Ok(TokenAction::Keep)
        }
    }
}

/// Long-lived authenticated handle to Vault
pub struct Session {
    backend: Arc<dyn VaultBackend>,
    auth: AuthMethod,
    address: String,
    namespace: Option<String>,
    transit_mount: String,
    transit_key: String,
    retry: RetryPolicy,
    renewal: RenewalPolicy,
    key_id: RwLock<String>,
    // completed login attempts, successful or not
    generation: AtomicU64,
    last_login: Mutex<std::result::Result<(), String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("transit_mount", &self.transit_mount)
            .field("transit_key", &self.transit_key)
            .field("auth", &self.auth)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

impl Session {
    /// Connect to Vault over HTTP and log in
    pub async fn open(ctx: &RequestContext, config: &PluginConfig) -> Result<Self> {
        let backend = HttpVaultBackend::new(config)?;
        Self::with_backend(ctx, config, Arc::new(backend)).await
    }

    /// Build a session on an existing backend and log in
    pub async fn with_backend(ctx: &RequestContext, config: &PluginConfig, backend: Arc<dyn VaultBackend>) -> Result<Self> {
        config.validate()?;
        let auth = AuthMethod::from_config(config)?;

        let session = Self {
            backend,
            auth,
            address: config.address.clone(),
            namespace: config.namespace.clone(),
            transit_mount: config.transit_mount().to_string(),
            transit_key: config.transit_key.clone(),
            retry: RetryPolicy::new(config.retry_attempts, config.retry_delay()),
            renewal: RenewalPolicy::new(config.renew_threshold),
            key_id: RwLock::new(String::new()),
            generation: AtomicU64::new(0),
            last_login: Mutex::new(Ok(())),
        };

        let mut outcome = session.last_login.lock().await;
        session.login(ctx, &mut outcome).await?;
        drop(outcome);

        info!(
            address = %session.address,
            namespace = session.namespace.as_deref().unwrap_or(""),
            auth_method = ?session.auth.kind(),
            role = session.auth.role(),
            "vault session established"
        );
        Ok(session)
    }

    async fn login(&self, ctx: &RequestContext, outcome: &mut std::result::Result<(), String>) -> Result<()> {
        let result = ctx.run(self.backend.login(&self.auth)).await?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(auth) => {
                debug!(lease_duration = auth.lease_duration, renewable = auth.renewable, "vault login succeeded");
                *outcome = Ok(());
                Ok(())
            }
            Err(err) => {
                *outcome = Err(err.0.clone());
                Err(KmsError::authentication_failed(err.0))
            }
        }
    }

    /// Run one backend operation under the retry policy
    pub async fn execute(&self, ctx: &RequestContext, op: &VaultOperation) -> Result<Option<Value>> {
        self.retry.execute(ctx, self.backend.as_ref(), self, op).await
    }

    /// Look up the token and renew it when most of its TTL has elapsed.
    ///
    /// A TTL outside `(0, creation_ttl]` means the token state cannot be
    /// trusted and comes back as [`KmsError::TokenInvariantViolation`].
    pub async fn check_token_validity(&self, ctx: &RequestContext) -> Result<TokenAction> {
        let data = self
            .execute(ctx, &VaultOperation::read(TOKEN_LOOKUP_SELF_PATH))
            .await?
            .ok_or_else(|| KmsError::invalid_response("token lookup returned no data"))?;
        let state = TokenState::from_lookup(&data)?;

        let action = self.renewal.evaluate(state).inspect_err(|_| {
            error!(ttl = state.ttl, creation_ttl = state.creation_ttl, "token ttl invariant violated");
        })?;

        if action == TokenAction::Renew {
            info!(ttl = state.ttl, creation_ttl = state.creation_ttl, "renewing vault token");
            self.renew_token(ctx, state.creation_ttl).await?;
        }
        Ok(action)
    }

    async fn renew_token(&self, ctx: &RequestContext, creation_ttl: i64) -> Result<()> {
        let payload = json!({
            "increment": format!("{creation_ttl}s"),
            "renewable": true,
        });
        self.execute(ctx, &VaultOperation::write(TOKEN_RENEW_SELF_PATH, payload)).await?;
        Ok(())
    }

    pub fn transit_key(&self) -> &str {
        &self.transit_key
    }

    pub fn key_path(&self) -> String {
        format!("{}/keys/{}", self.transit_mount, self.transit_key)
    }

    pub fn encrypt_path(&self) -> String {
        format!("{}/encrypt/{}", self.transit_mount, self.transit_key)
    }

    pub fn decrypt_path(&self) -> String {
        format!("{}/decrypt/{}", self.transit_mount, self.transit_key)
    }

    /// Last derived key ID, empty until the first fetch
    pub fn current_key_id(&self) -> String {
        match self.key_id.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_key_id(&self, key_id: String) {
        let mut guard = match self.key_id.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard != key_id {
            info!(previous = %*guard, current = %key_id, "transit key id changed");
            *guard = key_id;
        }
    }
}

#[async_trait]
impl Relogin for Session {
    fn credential_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn relogin(&self, ctx: &RequestContext, observed: u64) -> Result<()> {
        let mut outcome = ctx.run(self.last_login.lock()).await?;

        // another caller logged in while we waited for the gate
        if self.generation.load(Ordering::SeqCst) != observed {
            return outcome.clone().map_err(KmsError::authentication_failed);
        }

        warn!(auth_method = ?self.auth.kind(), "vault rejected the token, logging in again");
        self.login(ctx, &mut outcome).await
    }
}

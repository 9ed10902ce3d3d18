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

//! Bounded retry around single backend operations

use crate::backend::{VaultBackend, VaultOperation};
use crate::classify::{VaultError, classify};
use crate::config::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS};
use crate::context::RequestContext;
use crate::error::{KmsError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Re-authentication hook the retry loop calls on an invalid token
#[async_trait]
pub trait Relogin: Send + Sync {
    /// Counter bumped by every completed login
    fn credential_generation(&self) -> u64;

    /// Log in again unless a login already completed after `observed`
    async fn relogin(&self, ctx: &RequestContext, observed: u64) -> Result<()>;
}

/// Fixed-delay retry policy
///
/// Stateless: one policy value is shared by every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds, the attempts run out or `ctx` ends.
    ///
    /// Context errors are returned as they are. When every attempt failed the
    /// last classified error is returned, as [`KmsError::CredentialRejected`]
    /// if Vault was still refusing the token.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        backend: &dyn VaultBackend,
        relogin: &dyn Relogin,
        op: &VaultOperation,
    ) -> Result<Option<Value>> {
        let mut last_error: Option<VaultError> = None;

        for attempt in 1..=self.max_attempts {
            ctx.check()?;

            let observed = relogin.credential_generation();
            match ctx.run(op.execute(backend)).await? {
                Ok(data) => {
                    if attempt > 1 {
                        debug!(path = %op.path, attempt, "vault operation succeeded after retry");
                    }
                    return Ok(data);
                }
                Err(raw) => {
                    let err = classify(raw.0);
                    warn!(path = %op.path, attempt, max_attempts = self.max_attempts, status = ?err.status_code(), "vault operation failed");

                    // relogin only ahead of another attempt
                    if err.is_invalid_token() && attempt < self.max_attempts {
                        if let Err(relogin_err) = relogin.relogin(ctx, observed).await {
                            if relogin_err.is_context_error() {
                                return Err(relogin_err);
                            }
                            warn!(error = %relogin_err, "relogin failed, retrying with the current token");
                        }
                    }
                    last_error = Some(err);
                }
            }

            if attempt < self.max_attempts {
                ctx.sleep(self.delay).await?;
            }
        }

        match last_error {
            Some(err) if err.is_invalid_token() => Err(KmsError::CredentialRejected(err)),
            Some(err) => Err(KmsError::Vault(err)),
            None => Err(KmsError::internal_error("retry loop ran no attempts")),
        }
    }
}

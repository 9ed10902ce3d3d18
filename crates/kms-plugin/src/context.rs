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

//! Cancellation and deadline propagation for plugin requests

use crate::error::{KmsError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-request context handed down from the transport
///
/// Cloning shares the same cancellation token. Use [`RequestContext::with_timeout`]
/// to derive a child whose cancellation does not reach the parent.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context driven by an existing cancellation token
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    /// Child context bounded by `timeout`, never later than the parent deadline
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Error for an already cancelled or expired context
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(KmsError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(KmsError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> KmsError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => KmsError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => KmsError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                KmsError::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the context ends first
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }

    /// Sleep that wakes early with the context error
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(tokio::time::sleep(duration)).await
    }
}

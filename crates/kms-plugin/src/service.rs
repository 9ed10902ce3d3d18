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

//! KMS v2 plugin service contract

use crate::context::RequestContext;
use crate::error::Result;
use crate::types::{DecryptRequest, EncryptResponse, StatusResponse};
use async_trait::async_trait;

/// Operations the plugin transport dispatches to a provider
///
/// Calls arrive concurrently on separate tasks, so implementations must be
/// safe to share. Every call honors the cancellation and deadline of `ctx`.
#[async_trait]
pub trait KmsService: Send + Sync {
    /// Encrypt `plaintext` under the current key
    async fn encrypt(&self, ctx: &RequestContext, uid: &str, plaintext: &[u8]) -> Result<EncryptResponse>;

    /// Decrypt ciphertext previously returned by `encrypt`
    async fn decrypt(&self, ctx: &RequestContext, uid: &str, request: &DecryptRequest) -> Result<Vec<u8>>;

    /// Report health and the current key ID
    async fn status(&self, ctx: &RequestContext) -> Result<StatusResponse>;
}

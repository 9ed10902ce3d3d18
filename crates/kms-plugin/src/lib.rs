#![deny(clippy::unwrap_used)]
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

//! # RustFS KMS v2 Plugin
//!
//! Kubernetes KMS v2 provider backed by the HashiCorp Vault transit engine.
//! The transport that speaks the plugin wire protocol lives outside this
//! crate and drives a [`VaultProvider`] through the [`KmsService`] trait.
//!
//! Layers, leaves first:
//!
//! - [`classify`] turns Vault error text into matchable errors
//! - [`RetryPolicy`] runs one backend operation with bounded attempts and
//!   relogin on an invalid token
//! - [`Session`] owns the login, token renewal and the cached key ID
//! - [`KeyVersionTracker`] derives the key ID from the transit key version
//! - [`VaultProvider`] implements Encrypt, Decrypt, Status and Health
//!
//! ```rust,ignore
//! use rustfs_kms_plugin::{KmsService, PluginConfig, RequestContext, VaultProvider};
//!
//! async fn serve() -> rustfs_kms_plugin::Result<()> {
//!     let config = PluginConfig::from_file("/etc/kms/vault.json")?;
//!     let ctx = RequestContext::new();
//!     let provider = VaultProvider::open(&ctx, &config).await?;
//!     let status = provider.status(&ctx).await?;
//!     println!("{} {}", status.healthz, status.key_id);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod classify;
mod config;
mod context;
mod error;
mod key_version;
mod provider;
mod retry;
mod service;
mod session;
mod types;

pub use backend::{AuthInfo, AuthMethod, HttpVaultBackend, RawVaultError, VaultBackend, VaultMethod, VaultOperation};
pub use classify::{INVALID_TOKEN, Sentinel, VAULT_SEALED, VaultApiError, VaultError};
pub use config::{AuthMethodKind, PluginConfig, TlsConfig};
pub use context::RequestContext;
pub use error::{KmsError, Result};
pub use key_version::{KEY_ID_TAG, KeyVersionTracker, TransitKeyMetadata, derive_key_id};
pub use provider::{HEALTH_MARKER, VaultProvider};
pub use retry::{Relogin, RetryPolicy};
pub use service::KmsService;
pub use session::{RenewalPolicy, Session, TokenAction, TokenState};
pub use types::{
    ANNOTATION_KEY, ANNOTATION_VERSION, Annotations, DecryptRequest, EncryptResponse, HEALTHZ_NOK, HEALTHZ_OK,
    STATUS_VERSION, StatusResponse, default_annotations, validate_annotations,
};

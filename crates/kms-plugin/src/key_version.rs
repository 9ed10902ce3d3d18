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

//! Transit key version tracking and key ID derivation

use crate::backend::VaultOperation;
use crate::context::RequestContext;
use crate::error::{KmsError, Result};
use crate::session::Session;
use serde_json::Value;
use tracing::debug;

/// Prefix of every key ID the plugin reports
pub const KEY_ID_TAG: &str = "rustfs-kms-plugin";

/// The parts of a transit key read that identify its current version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitKeyMetadata {
    pub name: String,
    pub latest_version: u64,
    /// Creation timestamp of `latest_version`, as Vault reported it
    pub creation_timestamp: String,
}

impl TransitKeyMetadata {
    /// Parse the `data` object of `GET {transit}/keys/{name}`
    pub fn from_response(data: &Value) -> Result<Self> {
        let name = data.get("name").and_then(Value::as_str).unwrap_or_default().to_string();

        let latest = data
            .get("latest_version")
            .ok_or_else(|| KmsError::invalid_response("transit key has no latest_version"))?;
        let latest_version = latest
            .as_u64()
            .or_else(|| latest.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| KmsError::invalid_response(format!("transit key latest_version is not a number: {latest}")))?;

        let keys = data
            .get("keys")
            .and_then(Value::as_object)
            .ok_or_else(|| KmsError::invalid_response("transit key has no keys map"))?;
        let entry = keys.get(&latest_version.to_string()).ok_or_else(|| {
            KmsError::invalid_response(format!("transit key has no entry for latest version {latest_version}"))
        })?;

        Ok(Self {
            name,
            latest_version,
            creation_timestamp: timestamp_of(entry)?,
        })
    }
}

// symmetric keys map versions to unix seconds, asymmetric ones to an object
fn timestamp_of(entry: &Value) -> Result<String> {
    match entry {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Object(obj) => obj
            .get("creation_time")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| KmsError::invalid_response("transit key version has no creation_time")),
        other => Err(KmsError::invalid_response(format!("unexpected transit key version entry: {other}"))),
    }
}

/// `{tag}_{latest_version}_{timestamp}`
pub fn derive_key_id(tag: &str, metadata: &TransitKeyMetadata) -> String {
    format!("{tag}_{}_{}", metadata.latest_version, metadata.creation_timestamp)
}

/// Reads transit key metadata and derives the key ID from it
#[derive(Debug, Clone)]
pub struct KeyVersionTracker {
    tag: String,
}

impl Default for KeyVersionTracker {
    fn default() -> Self {
        Self::new(KEY_ID_TAG)
    }
}

impl KeyVersionTracker {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    /// Fetch the key and return its derived ID. Caching is up to the caller.
    pub async fn fetch_latest_key_id(&self, ctx: &RequestContext, session: &Session) -> Result<(String, TransitKeyMetadata)> {
        let data = session
            .execute(ctx, &VaultOperation::read(session.key_path()))
            .await?
            .ok_or_else(|| KmsError::invalid_response(format!("transit key {} not found", session.transit_key())))?;

        let metadata = TransitKeyMetadata::from_response(&data)?;
        let key_id = derive_key_id(&self.tag, &metadata);
        debug!(key = %metadata.name, latest_version = metadata.latest_version, key_id = %key_id, "fetched transit key");
        Ok((key_id, metadata))
    }
}

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

//! KMS v2 plugin protocol types

use crate::error::{KmsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Annotation key attached to every ciphertext the plugin produces
pub const ANNOTATION_KEY: &str = "v2.kms-plugin.rustfs.com";

/// Current annotation format version
pub const ANNOTATION_VERSION: &[u8] = b"1";

/// KMS plugin API version reported by Status
pub const STATUS_VERSION: &str = "v2";

pub const HEALTHZ_OK: &str = "ok";
pub const HEALTHZ_NOK: &str = "nok";

/// Annotations as the plugin protocol carries them
pub type Annotations = HashMap<String, Vec<u8>>;

/// The single annotation every encrypt response carries
pub fn default_annotations() -> Annotations {
    HashMap::from([(ANNOTATION_KEY.to_string(), ANNOTATION_VERSION.to_vec())])
}

/// Accept exactly one annotation, the plugin marker with the current version
pub fn validate_annotations(annotations: &Annotations) -> Result<()> {
    if annotations.len() != 1 {
        return Err(KmsError::invalid_annotations(format!(
            "expected exactly one annotation, got {}",
            annotations.len()
        )));
    }
    match annotations.get(ANNOTATION_KEY) {
        Some(version) if version.as_slice() == ANNOTATION_VERSION => Ok(()),
        Some(_) => Err(KmsError::invalid_annotations(format!("invalid version in annotation {ANNOTATION_KEY}"))),
        None => Err(KmsError::invalid_annotations(format!("missing annotation {ANNOTATION_KEY}"))),
    }
}

/// Result of an encrypt call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptResponse {
    /// Transit ciphertext (`vault:v<N>:...`)
    pub ciphertext: Vec<u8>,
    /// Key ID current when the plaintext was encrypted
    pub key_id: String,
    pub annotations: Annotations,
}

/// Input of a decrypt call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptRequest {
    pub ciphertext: Vec<u8>,
    pub key_id: String,
    pub annotations: Annotations,
}

impl DecryptRequest {
    /// Request for ciphertext produced by [`EncryptResponse`]
    pub fn from_encrypt_response(response: &EncryptResponse) -> Self {
        Self {
            ciphertext: response.ciphertext.clone(),
            key_id: response.key_id.clone(),
            annotations: response.annotations.clone(),
        }
    }
}

/// Result of a status call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub healthz: String,
    pub key_id: String,
}

impl StatusResponse {
    pub fn new(healthy: bool, key_id: String) -> Self {
        Self {
            version: STATUS_VERSION.to_string(),
            healthz: if healthy { HEALTHZ_OK } else { HEALTHZ_NOK }.to_string(),
            key_id,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthz == HEALTHZ_OK
    }
}

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

//! In-memory Vault with a transit engine and token endpoints

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustfs_kms_plugin::backend::{BackendResult, format_api_error};
use rustfs_kms_plugin::{AuthInfo, AuthMethod, PluginConfig, RawVaultError, VaultBackend};
use serde_json::{Map, Value, json};
use std::sync::Mutex;

pub const ADDRESS: &str = "http://127.0.0.1:8200";
pub const TRANSIT_KEY: &str = "kms-key";
pub const FIRST_KEY_TIMESTAMP: u64 = 1_700_000_000;

pub fn test_config() -> PluginConfig {
    PluginConfig::new(ADDRESS, TRANSIT_KEY, "kms-plugin")
}

#[derive(Debug)]
struct KeyVersion {
    created: u64,
    mask: u8,
}

#[derive(Debug)]
struct State {
    versions: Vec<KeyVersion>,
    token: Option<String>,
    logins: usize,
    refuse_login: bool,
    ttl: i64,
    creation_ttl: i64,
    renewals: Vec<Value>,
    calls: usize,
    reject_token: usize,
    sealed: bool,
    tamper_decrypt: bool,
    bad_plaintext_encoding: bool,
}

/// Fake Vault server
///
/// Ciphertext is `vault:v<N>:<base64>` so any still existing version can be
/// decrypted after a rotation, like the real transit engine.
#[derive(Debug)]
pub struct FakeVault {
    state: Mutex<State>,
}

impl Default for FakeVault {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVault {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                versions: vec![KeyVersion {
                    created: FIRST_KEY_TIMESTAMP,
                    mask: 0x5a,
                }],
                token: None,
                logins: 0,
                refuse_login: false,
                ttl: 800,
                creation_ttl: 900,
                renewals: Vec::new(),
                calls: 0,
                reject_token: 0,
                sealed: false,
                tamper_decrypt: false,
                bad_plaintext_encoding: false,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake vault lock")
    }

    /// Add a new key version, returns its number
    pub fn rotate(&self) -> u64 {
        let mut state = self.state();
        let next = state.versions.len() as u64 + 1;
        state.versions.push(KeyVersion {
            created: FIRST_KEY_TIMESTAMP + next * 1000,
            mask: 0x5a ^ (next as u8),
        });
        next
    }

    pub fn latest_timestamp(&self) -> u64 {
        self.state().versions.last().map(|v| v.created).unwrap_or_default()
    }

    pub fn set_ttl(&self, ttl: i64, creation_ttl: i64) {
        let mut state = self.state();
        state.ttl = ttl;
        state.creation_ttl = creation_ttl;
    }

    pub fn reject_token(&self, times: usize) {
        self.state().reject_token = times;
    }

    pub fn refuse_login(&self, refuse: bool) {
        self.state().refuse_login = refuse;
    }

    pub fn seal(&self) {
        self.state().sealed = true;
    }

    pub fn tamper_decrypt(&self) {
        self.state().tamper_decrypt = true;
    }

    pub fn corrupt_plaintext_encoding(&self) {
        self.state().bad_plaintext_encoding = true;
    }

    pub fn calls(&self) -> usize {
        self.state().calls
    }

    pub fn logins(&self) -> usize {
        self.state().logins
    }

    pub fn renewals(&self) -> Vec<Value> {
        self.state().renewals.clone()
    }

    fn api_error(method: &str, path: &str, code: u16, errors: &[&str]) -> RawVaultError {
        let errors: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        RawVaultError::new(format_api_error(None, method, &format!("{ADDRESS}/v1/{path}"), code, &errors, None))
    }

    fn admit(&self, state: &mut State, method: &str, path: &str) -> BackendResult<()> {
        state.calls += 1;
        if state.sealed {
            return Err(Self::api_error(method, path, 503, &["Vault is sealed"]));
        }
        if state.reject_token > 0 || state.token.is_none() {
            state.reject_token = state.reject_token.saturating_sub(1);
            return Err(Self::api_error(method, path, 403, &["permission denied", "invalid token"]));
        }
        Ok(())
    }

    fn key_metadata(state: &State) -> Value {
        let keys: Map<String, Value> = state
            .versions
            .iter()
            .enumerate()
            .map(|(i, v)| ((i + 1).to_string(), json!(v.created)))
            .collect();
        json!({
            "name": TRANSIT_KEY,
            "type": "aes256-gcm96",
            "latest_version": state.versions.len(),
            "min_decryption_version": 1,
            "keys": keys,
        })
    }

    fn encrypt(state: &State, payload: &Value) -> BackendResult<Value> {
        let plaintext = payload
            .get("plaintext")
            .and_then(Value::as_str)
            .and_then(|p| STANDARD.decode(p).ok())
            .ok_or_else(|| Self::api_error("PUT", "transit/encrypt", 400, &["invalid plaintext"]))?;
        let version = state.versions.len();
        let mask = state.versions[version - 1].mask;
        let sealed: Vec<u8> = plaintext.iter().map(|b| b ^ mask).collect();
        Ok(json!({
            "ciphertext": format!("vault:v{version}:{}", STANDARD.encode(sealed)),
            "key_version": version,
        }))
    }

    fn decrypt(state: &State, payload: &Value) -> BackendResult<Value> {
        let path = "transit/decrypt";
        let ciphertext = payload
            .get("ciphertext")
            .and_then(Value::as_str)
            .ok_or_else(|| Self::api_error("PUT", path, 400, &["missing ciphertext"]))?;
        let mut parts = ciphertext.splitn(3, ':');
        let (Some("vault"), Some(version), Some(body)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Self::api_error("PUT", path, 400, &["invalid ciphertext"]));
        };
        let version: usize = version
            .trim_start_matches('v')
            .parse()
            .map_err(|_| Self::api_error("PUT", path, 400, &["invalid ciphertext version"]))?;
        let key = state
            .versions
            .get(version.wrapping_sub(1))
            .ok_or_else(|| Self::api_error("PUT", path, 400, &["invalid key version"]))?;
        let sealed = STANDARD
            .decode(body)
            .map_err(|_| Self::api_error("PUT", path, 400, &["invalid ciphertext encoding"]))?;

        if state.bad_plaintext_encoding {
            return Ok(json!({ "plaintext": "%%%not-base64%%%" }));
        }
        let mut plaintext: Vec<u8> = sealed.iter().map(|b| b ^ key.mask).collect();
        if state.tamper_decrypt {
            plaintext.reverse();
            plaintext.push(b'!');
        }
        Ok(json!({ "plaintext": STANDARD.encode(plaintext) }))
    }
}

#[async_trait]
impl VaultBackend for FakeVault {
    async fn read(&self, path: &str) -> BackendResult<Option<Value>> {
        let mut state = self.state();
        self.admit(&mut state, "GET", path)?;
        match path {
            "auth/token/lookup-self" => Ok(Some(json!({
                "ttl": state.ttl,
                "creation_ttl": state.creation_ttl,
                "renewable": true,
            }))),
            p if p == format!("transit/keys/{TRANSIT_KEY}") => Ok(Some(Self::key_metadata(&state))),
            _ => Ok(None),
        }
    }

    async fn write(&self, path: &str, payload: Option<&Value>) -> BackendResult<Option<Value>> {
        let mut state = self.state();
        self.admit(&mut state, "PUT", path)?;
        let payload = payload.cloned().unwrap_or(Value::Null);
        match path {
            "auth/token/renew-self" => {
                state.ttl = state.creation_ttl;
                state.renewals.push(payload);
                Ok(None)
            }
            p if p == format!("transit/encrypt/{TRANSIT_KEY}") => Self::encrypt(&state, &payload).map(Some),
            p if p == format!("transit/decrypt/{TRANSIT_KEY}") => Self::decrypt(&state, &payload).map(Some),
            other => Err(Self::api_error("PUT", other, 404, &["no handler for route"])),
        }
    }

    async fn login(&self, auth: &AuthMethod) -> BackendResult<AuthInfo> {
        let mut state = self.state();
        if state.refuse_login {
            return Err(Self::api_error("PUT", &auth.login_path(), 403, &["permission denied"]));
        }
        state.logins += 1;
        state.ttl = state.creation_ttl;
        let token = format!("hvs.fake-{}", state.logins);
        state.token = Some(token.clone());
        Ok(AuthInfo {
            client_token: token,
            accessor: String::new(),
            lease_duration: state.creation_ttl as u64,
            renewable: true,
        })
    }
}

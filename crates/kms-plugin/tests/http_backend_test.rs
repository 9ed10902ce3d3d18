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

use rustfs_kms_plugin::classify::classify;
use rustfs_kms_plugin::{
    AuthMethod, HttpVaultBackend, PluginConfig, RequestContext, Session, TokenAction, VaultBackend, VaultError,
};
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "hvs.test-token";

fn cert_config(server: &MockServer) -> PluginConfig {
    let mut config = PluginConfig::new(server.uri(), "kms-key", "kms-plugin");
    config.auth_method = "cert".to_string();
    config
}

fn cert_login() -> AuthMethod {
    AuthMethod::Cert {
        role: "kms-plugin".to_string(),
        mount: "cert".to_string(),
    }
}

async fn mount_login(server: &MockServer, login_path: &str) {
    Mock::given(method("PUT"))
        .and(path(login_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": { "client_token": TOKEN, "accessor": "acc", "lease_duration": 900, "renewable": true }
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_installs_token_for_later_requests() {
    let server = MockServer::start().await;
    mount_login(&server, "/v1/auth/cert/login").await;
    Mock::given(method("GET"))
        .and(path("/v1/transit/keys/kms-key"))
        .and(header("X-Vault-Token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "name": "kms-key" } })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpVaultBackend::new(&cert_config(&server)).expect("backend builds");
    let info = backend.login(&cert_login()).await.expect("login succeeds");
    assert_eq!(info.client_token, TOKEN);
    assert_eq!(info.lease_duration, 900);

    let data = backend.read("transit/keys/kms-key").await.expect("read succeeds");
    assert_eq!(data, Some(json!({ "name": "kms-key" })));

    let requests = server.received_requests().await.expect("recording is on");
    let login = requests
        .iter()
        .find(|req| req.url.path() == "/v1/auth/cert/login")
        .expect("login request was sent");
    assert!(login.headers.get("x-vault-token").is_none());
}

#[tokio::test]
async fn test_namespace_header_on_every_request() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/transit/encrypt/kms-key"))
        .and(header("X-Vault-Namespace", "team-a"))
        .and(body_json(json!({ "plaintext": "aGVsbG8=" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "ciphertext": "vault:v1:abc" } })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = cert_config(&server);
    config.namespace = Some("team-a".to_string());
    let backend = HttpVaultBackend::new(&config).expect("backend builds");

    let data = backend
        .write("transit/encrypt/kms-key", Some(&json!({ "plaintext": "aGVsbG8=" })))
        .await
        .expect("encrypt succeeds");
    assert_eq!(data, Some(json!({ "ciphertext": "vault:v1:abc" })));
}

#[tokio::test]
async fn test_rejected_token_is_classified_as_invalid_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/token/lookup-self"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({ "errors": ["permission denied", "invalid token"] })),
        )
        .mount(&server)
        .await;

    let mut config = cert_config(&server);
    config.namespace = Some("team-a".to_string());
    let backend = HttpVaultBackend::new(&config).expect("backend builds");

    let raw = backend.read("auth/token/lookup-self").await.expect_err("403 is an error");
    match classify(raw.0) {
        VaultError::Api(err) => {
            assert_eq!(err.status_code, 403);
            assert_eq!(err.method, "GET");
            assert_eq!(err.url, format!("{}/v1/auth/token/lookup-self", server.uri()));
            assert_eq!(err.namespace, "team-a");
            assert_eq!(err.messages, vec!["permission denied", "invalid token"]);
            assert!(VaultError::Api(err).is_invalid_token());
        }
        VaultError::Generic(raw) => panic!("expected a structured error: {raw}"),
    }
}

#[tokio::test]
async fn test_not_found_without_errors_reads_as_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/transit/keys/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/transit/keys/denied"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": ["no handler for route"] })))
        .mount(&server)
        .await;

    let backend = HttpVaultBackend::new(&cert_config(&server)).expect("backend builds");
    assert_eq!(backend.read("transit/keys/missing").await.expect("empty 404 is not an error"), None);

    let raw = backend.read("transit/keys/denied").await.expect_err("404 with errors fails");
    assert_eq!(classify(raw.0).status_code(), Some(404));
}

#[tokio::test]
async fn test_non_json_failure_keeps_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/transit/decrypt/kms-key"))
        .respond_with(ResponseTemplate::new(502).set_body_string("  upstream unavailable\n"))
        .mount(&server)
        .await;

    let backend = HttpVaultBackend::new(&cert_config(&server)).expect("backend builds");
    let raw = backend
        .write("transit/decrypt/kms-key", Some(&json!({ "ciphertext": "vault:v1:abc" })))
        .await
        .expect_err("502 is an error");

    assert!(raw.0.contains("Code: 502. Raw Message:\n\nupstream unavailable"), "{}", raw.0);
    let classified = classify(raw.0);
    assert_eq!(classified.status_code(), Some(502));
    assert!(!classified.is_invalid_token());
}

#[tokio::test]
async fn test_login_without_client_token_fails() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/auth/cert/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "auth": null, "warnings": ["no role"] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/transit/keys/kms-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
        .mount(&server)
        .await;

    let backend = HttpVaultBackend::new(&cert_config(&server)).expect("backend builds");
    let err = backend.login(&cert_login()).await.expect_err("login without a token fails");
    assert!(err.0.contains("no auth info was returned"), "{}", err.0);

    backend.read("transit/keys/kms-key").await.expect("read succeeds");
    let requests = server.received_requests().await.expect("recording is on");
    let read = requests
        .iter()
        .find(|req| req.url.path() == "/v1/transit/keys/kms-key")
        .expect("read request was sent");
    assert!(read.headers.get("x-vault-token").is_none());
}

#[tokio::test]
async fn test_session_over_http_logs_in_with_service_account_jwt() {
    let mut jwt = NamedTempFile::new().expect("Failed to create temp file");
    jwt.write_all(b"eyJhbGciOi.service-account\n").expect("Failed to write jwt");

    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/auth/kubernetes/login"))
        .and(body_json(json!({ "role": "kms-plugin", "jwt": "eyJhbGciOi.service-account" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": { "client_token": TOKEN, "lease_duration": 900, "renewable": true }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/token/lookup-self"))
        .and(header("X-Vault-Token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "ttl": 850, "creation_ttl": 900 } })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = PluginConfig::new(server.uri(), "kms-key", "kms-plugin");
    config.jwt_path = jwt.path().to_path_buf();

    let ctx = RequestContext::new();
    let session = Session::open(&ctx, &config).await.expect("session opens");
    let action = session.check_token_validity(&ctx).await.expect("token is valid");
    assert_eq!(action, TokenAction::Keep);
}

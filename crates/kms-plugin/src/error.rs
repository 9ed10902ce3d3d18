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

//! KMS plugin error types and handling

use crate::classify::VaultError;

/// Result type alias for KMS plugin operations
pub type Result<T> = std::result::Result<T, KmsError>;

/// KMS plugin operation errors
#[derive(thiserror::Error, Debug)]
pub enum KmsError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Login failed while establishing the session
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Token lookup returned a TTL that cannot belong to an untampered token
    #[error("Token invariant violated: ttl={ttl} creation_ttl={creation_ttl}, re-login needed")]
    TokenInvariantViolation { ttl: i64, creation_ttl: i64 },

    /// Vault kept rejecting the token after every retry and relogin
    #[error("Credential rejected by Vault after retries: {0}")]
    CredentialRejected(VaultError),

    /// Vault request failed after retries
    #[error("Vault request failed: {0}")]
    Vault(VaultError),

    /// Decrypt request annotations are missing or carry the wrong version
    #[error("Invalid annotations: {message}")]
    InvalidAnnotations { message: String },

    /// Decrypt request key ID does not match the current key
    #[error("Invalid key ID: expected {expected}, got {actual}")]
    KeyIdMismatch { expected: String, actual: String },

    /// Decrypt request ciphertext is not a transit ciphertext string
    #[error("Invalid ciphertext: {message}")]
    InvalidCiphertext { message: String },

    /// Vault answered with a payload that lacks an expected field
    #[error("Invalid response from Vault: {message}")]
    InvalidResponse { message: String },

    /// Encrypt/decrypt self test did not round-trip
    #[error("Health check failed: {message}")]
    HealthCheckFailed { message: String },

    /// The caller cancelled the request
    #[error("Operation cancelled")]
    Cancelled,

    /// The request deadline passed
    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    /// Internal error
    #[error("Internal error: {message}")]
    InternalError { message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Base64 decode error
    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl KmsError {
    /// Create a configuration error
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Create an authentication failed error
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed { reason: reason.into() }
    }

    /// Create an invalid annotations error
    pub fn invalid_annotations(message: impl Into<String>) -> Self {
        Self::InvalidAnnotations { message: message.into() }
    }

    /// Create an invalid response error
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse { message: message.into() }
    }

    /// Create a health check failed error
    pub fn health_check_failed(message: impl Into<String>) -> Self {
        Self::HealthCheckFailed { message: message.into() }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// The process must stop serving once one of these is observed
    pub fn is_fatal(&self) -> bool {
        matches!(self, KmsError::TokenInvariantViolation { .. } | KmsError::CredentialRejected(_))
    }

    /// Check if the error came from the request deadline or a cancellation
    pub fn is_context_error(&self) -> bool {
        matches!(self, KmsError::Cancelled | KmsError::DeadlineExceeded)
    }

    /// Classified Vault error carried by this error, if any
    pub fn vault_error(&self) -> Option<&VaultError> {
        match self {
            KmsError::Vault(err) | KmsError::CredentialRejected(err) => Some(err),
            _ => None,
        }
    }
}

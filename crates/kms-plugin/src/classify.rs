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

//! Structured view of Vault API error text
//!
//! Vault reports failures as formatted text rather than typed codes. This
//! module is the single place that text is parsed: it extracts the HTTP
//! method, URL, status code, optional namespace and the individual messages
//! so callers can match errors against well-known sentinels instead of
//! sniffing substrings.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static API_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"URL: (\S+) (\S+)\s*Code: (\d+)\. .*?:\s*(?s)(.*)").expect("API error pattern is valid")
});

static NAMESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Namespace: (.+)\n").expect("namespace pattern is valid"));

/// Reference classification that parsed errors are matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinel {
    pub status_code: u16,
    /// Empty means a status code match is sufficient
    pub message: &'static str,
}

impl Sentinel {
    pub const fn new(status_code: u16, message: &'static str) -> Self {
        Self { status_code, message }
    }
}

/// The token presented to Vault is no longer accepted
pub const INVALID_TOKEN: Sentinel = Sentinel::new(403, "invalid token");

/// Vault is sealed and cannot serve any request
pub const VAULT_SEALED: Sentinel = Sentinel::new(503, "Vault is sealed");

/// A Vault error whose layout was recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultApiError {
    pub status_code: u16,
    pub method: String,
    pub url: String,
    pub namespace: String,
    pub messages: Vec<String>,
    original: String,
}

impl VaultApiError {
    /// Original, unmodified error text
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Same status code and, when the sentinel carries a message, at least
    /// one parsed message containing it (case-insensitive).
    pub fn is(&self, sentinel: &Sentinel) -> bool {
        if self.status_code != sentinel.status_code {
            return false;
        }
        if sentinel.message.is_empty() {
            return true;
        }
        let needle = sentinel.message.to_lowercase();
        self.messages.iter().any(|msg| msg.to_lowercase().contains(&needle))
    }
}

/// Result of classifying raw backend error text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// Recognised Vault API error
    Api(VaultApiError),
    /// Text that does not follow the Vault API error layout, kept verbatim
    Generic(String),
}

impl VaultError {
    pub fn is(&self, sentinel: &Sentinel) -> bool {
        match self {
            VaultError::Api(err) => err.is(sentinel),
            VaultError::Generic(_) => false,
        }
    }

    pub fn is_invalid_token(&self) -> bool {
        self.is(&INVALID_TOKEN)
    }

    pub fn is_sealed(&self) -> bool {
        self.is(&VAULT_SEALED)
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            VaultError::Api(err) => Some(err.status_code),
            VaultError::Generic(_) => None,
        }
    }

    /// Original error text, whichever layout it had
    pub fn original(&self) -> &str {
        match self {
            VaultError::Api(err) => err.original(),
            VaultError::Generic(raw) => raw,
        }
    }
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultError::Api(err) => f.write_str(&err.original),
            VaultError::Generic(raw) => write!(f, "failed to parse Vault error string: {raw}"),
        }
    }
}

impl std::error::Error for VaultError {}

/// Parse raw Vault error text into a [`VaultError`].
///
/// Never fails: text that cannot be matched comes back as
/// [`VaultError::Generic`] with the original string intact.
pub fn classify(raw: impl Into<String>) -> VaultError {
    let raw = raw.into();

    let Some(caps) = API_ERROR_RE.captures(&raw) else {
        return VaultError::Generic(raw);
    };

    let method = caps[1].to_string();
    let url = caps[2].to_string();
    let status_code = caps[3].parse::<u16>().unwrap_or(0);
    let messages = parse_messages(caps.get(4).map_or("", |m| m.as_str()));

    let namespace = NAMESPACE_RE
        .captures(&raw)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default();

    VaultError::Api(VaultApiError {
        status_code,
        method,
        url,
        namespace,
        messages,
        original: raw,
    })
}

fn parse_messages(body: &str) -> Vec<String> {
    if !body.contains("* ") {
        return vec![body.trim().to_string()];
    }

    body.trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.strip_prefix("* ") {
            Some(_) if line.ends_with(" errors occurred:") || line.ends_with(" error occurred:") => None,
            Some(rest) => Some(rest.to_string()),
            None => Some(line.to_string()),
        })
        .filter(|msg| !msg.is_empty())
        .collect()
}

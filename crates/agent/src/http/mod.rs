// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Async HTTP/HTTPS client (§4.D): request builder, synchronous perform,
//! streamed download, authentication helpers, and the long-running
//! `co_perform` loop used by the communicator's three coroutines.

pub mod client;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use client::HttpClient;

/// TLS verification modes (§4.D), a closed set. Unknown values deserialize
/// to `Full` (the `FromStr`/serde fallback below emits a warning).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// Accept any certificate.
    None,
    /// Verify the trust chain against the OS trust store, ignore hostname.
    Certificate,
    /// Verify trust chain and hostname (SAN, falling back to CN).
    Full,
}

impl Default for VerificationMode {
    fn default() -> Self {
        Self::Full
    }
}

impl std::str::FromStr for VerificationMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "certificate" => Self::Certificate,
            "full" => Self::Full,
            other => {
                tracing::warn!(value = %other, "unknown verification_mode, coercing to 'full'");
                Self::Full
            }
        })
    }
}

/// Authentication carried on a request.
#[derive(Debug, Clone)]
pub enum Auth {
    None,
    Bearer(String),
    Basic { user: String, password: String },
}

/// Parameters for building a single HTTP request (§4.D).
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub method: reqwest::Method,
    pub host: String,
    pub port: Option<u16>,
    pub endpoint: String,
    pub tls: bool,
    pub auth: Auth,
    pub body: Option<serde_json::Value>,
    pub verification_mode: VerificationMode,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl RequestParams {
    /// Build the fully-qualified request URL from host/port/endpoint.
    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{scheme}://{}:{port}{}", self.host, self.endpoint),
            None => format!("{scheme}://{}{}", self.host, self.endpoint),
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `HttpClient`: the concrete implementation of §4.D.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use crate::error::HttpError;
use crate::http::{Auth, RequestParams, VerificationMode};

/// Async HTTP/HTTPS client with per-verification-mode connection pools.
///
/// One `reqwest::Client` is built per `VerificationMode` so that repeated
/// requests under the same mode reuse connections (§4.D: "reuses a
/// connection across iterations when possible").
pub struct HttpClient {
    clients: HashMap<VerificationMode, reqwest::Client>,
    full: reqwest::Client,
}

impl HttpClient {
    /// Build a client with a connection pool for each verification mode.
    pub fn new() -> Self {
        let mut clients = HashMap::new();
        for mode in [VerificationMode::None, VerificationMode::Certificate, VerificationMode::Full] {
            clients.insert(mode, build_client(mode));
        }
        let full = build_client(VerificationMode::Full);
        Self { clients, full }
    }

    fn client_for(&self, mode: VerificationMode) -> &reqwest::Client {
        // Every mode is seeded in `new`; `full` is the guaranteed fallback.
        self.clients.get(&mode).unwrap_or(&self.full)
    }

    /// Pure builder: turn `RequestParams` into a `reqwest::RequestBuilder`.
    pub fn create_request(&self, params: &RequestParams) -> reqwest::RequestBuilder {
        let client = self.client_for(params.verification_mode);
        let mut req = client
            .request(params.method.clone(), params.url())
            .header("User-Agent", &params.user_agent)
            .header("Accept", "application/json")
            .timeout(params.request_timeout);

        req = match &params.auth {
            Auth::None => req,
            Auth::Bearer(token) => req.bearer_auth(token),
            Auth::Basic { user, password } => req.basic_auth(user, Some(password)),
        };

        if let Some(body) = &params.body {
            req = req.json(body);
        }

        req
    }

    /// Synchronous request/response, used during enrollment (§4.D).
    pub async fn perform(&self, params: &RequestParams) -> Result<(u16, String), HttpError> {
        let resp = self.create_request(params).send().await.map_err(classify_transport_error)?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok((status, body))
    }

    /// Stream the response body to disk with a bounded-memory reader.
    pub async fn perform_download(&self, params: &RequestParams, dst_path: &Path) -> Result<(), HttpError> {
        use futures_core_compat::StreamExt as _;

        let resp = self.create_request(params).send().await.map_err(classify_transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HttpError::Status(status.as_u16()));
        }

        let mut file = tokio::fs::File::create(dst_path).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify_transport_error)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// POST `/security/user/authenticate` with basic auth; returns the bearer
    /// token on 2xx, `None` on any non-2xx or parse error.
    pub async fn authenticate_with_user_password(
        &self,
        server_url: &str,
        user: &str,
        password: &str,
    ) -> Option<String> {
        let params = self.auth_request_params(
            server_url,
            "/security/user/authenticate",
            Auth::Basic { user: user.to_owned(), password: password.to_owned() },
        )?;
        self.authenticate(params).await
    }

    /// POST `/security/user/authenticate` using the registration UUID/key
    /// (sent as HTTP basic credentials, analogous to user/password auth).
    pub async fn authenticate_with_uuid_and_key(
        &self,
        server_url: &str,
        uuid: &str,
        key: &str,
    ) -> Option<String> {
        let params = self.auth_request_params(
            server_url,
            "/security/user/authenticate",
            Auth::Basic { user: uuid.to_owned(), password: key.to_owned() },
        )?;
        self.authenticate(params).await
    }

    fn auth_request_params(&self, server_url: &str, endpoint: &str, auth: Auth) -> Option<RequestParams> {
        let url = reqwest::Url::parse(server_url).ok()?;
        Some(RequestParams {
            method: reqwest::Method::POST,
            host: url.host_str()?.to_owned(),
            port: url.port(),
            endpoint: endpoint.to_owned(),
            tls: url.scheme() == "https",
            auth,
            body: None,
            verification_mode: VerificationMode::Full,
            user_agent: "agent-core".to_owned(),
            request_timeout: Duration::from_secs(10),
        })
    }

    async fn authenticate(&self, params: RequestParams) -> Option<String> {
        let (status, body) = self.perform(&params).await.ok()?;
        if !(200..300).contains(&status) {
            return None;
        }
        let value: serde_json::Value = serde_json::from_str(&body).ok()?;
        value.get("data")?.get("token")?.as_str().map(str::to_owned)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client(mode: VerificationMode) -> reqwest::Client {
    let builder = reqwest::Client::builder().use_rustls_tls();
    let builder = match mode {
        VerificationMode::None => builder.danger_accept_invalid_certs(true),
        VerificationMode::Certificate => {
            builder.danger_accept_invalid_certs(false).danger_accept_invalid_hostnames(true)
        }
        VerificationMode::Full => builder,
    };
    builder.build().unwrap_or_default()
}

fn classify_transport_error(err: reqwest::Error) -> HttpError {
    if err.is_timeout() {
        HttpError::Timeout
    } else {
        HttpError::Transport(err)
    }
}

/// Loop-condition + callback driven long-poll request loop (§4.D `co_perform`).
///
/// Repeats `build_params()` → request while `loop_condition()` holds:
/// - 401 invokes `on_unauthorized` then waits one `retry_interval`.
/// - 2xx invokes `on_success(body)`.
/// - timeout/transport error backs off by `retry_interval`.
pub async fn co_perform<BuildParams, OnUnauthorized, OnSuccess, LoopCondition>(
    client: &HttpClient,
    mut build_params: BuildParams,
    retry_interval: Duration,
    mut on_unauthorized: OnUnauthorized,
    mut on_success: OnSuccess,
    loop_condition: LoopCondition,
) where
    BuildParams: FnMut() -> RequestParams,
    OnUnauthorized: FnMut(),
    OnSuccess: FnMut(String),
    LoopCondition: Fn() -> bool,
{
    while loop_condition() {
        let params = build_params();
        match client.perform(&params).await {
            Ok((401, _)) => {
                on_unauthorized();
                tokio::time::sleep(retry_interval).await;
            }
            Ok((status, body)) if (200..300).contains(&status) => {
                on_success(body);
            }
            Ok((status, _)) => {
                tracing::debug!(status, "co_perform: unexpected status, retrying");
                tokio::time::sleep(retry_interval).await;
            }
            Err(e) => {
                tracing::debug!(err = %e, "co_perform: transport error, retrying");
                tokio::time::sleep(retry_interval).await;
            }
        }
    }
}

/// Thin shim so `perform_download`'s streaming loop reads like the rest of
/// the client without pulling in the full `futures` crate for one method.
mod futures_core_compat {
    pub use futures_util::StreamExt;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_host_port_endpoint() {
        let params = RequestParams {
            method: reqwest::Method::GET,
            host: "manager.example".to_owned(),
            port: Some(55000),
            endpoint: "/commands".to_owned(),
            tls: true,
            auth: Auth::None,
            body: None,
            verification_mode: VerificationMode::Full,
            user_agent: "agent-core".to_owned(),
            request_timeout: Duration::from_secs(5),
        };
        assert_eq!(params.url(), "https://manager.example:55000/commands");
    }

    #[test]
    fn unknown_verification_mode_coerces_to_full() {
        use std::str::FromStr;
        assert_eq!(VerificationMode::from_str("bogus").unwrap_or(VerificationMode::None), VerificationMode::Full);
    }
}

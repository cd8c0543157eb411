// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent Info & Enrollment (§4.L): identity persistence, endpoint metadata,
//! user-agent string, and the enrollment handshake against the manager.

use rand::Rng;

use crate::error::{AgentInfoError, HttpError};
use crate::http::{HttpClient, RequestParams, Auth, VerificationMode};
use crate::persistence::{Column, Criteria, Op, Persistence, Row, SqlitePersistence, Value};

const TABLE: &str = "agent_info";
const GROUP_TABLE: &str = "agent_group";
const PRODUCT: &str = "agent-core";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const KEY_LEN: usize = 32;
const KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Derived OS/platform/arch/IPv4 snapshot folded into the enrollment
/// metadata document (§4.L).
#[derive(Debug, Clone)]
pub struct EndpointInfo {
    pub os: String,
    pub platform: String,
    pub arch: String,
    pub ipv4: Option<String>,
}

impl EndpointInfo {
    /// Collect OS/arch from compile-time constants and the first "up"
    /// interface with a non-empty IPv4 list.
    pub fn collect() -> Self {
        Self { os: std::env::consts::OS.to_owned(), platform: std::env::consts::FAMILY.to_owned(), arch: std::env::consts::ARCH.to_owned(), ipv4: active_ipv4() }
    }
}

/// First "up" interface with a non-empty IPv4 list (§4.L), found by asking
/// the OS which local address it would route a packet through rather than
/// enumerating `/proc/net`/`getifaddrs` directly — no socket traffic is sent,
/// `connect()` on a UDP socket only resolves the kernel's routing decision.
fn active_ipv4() -> Option<String> {
    use std::net::{IpAddr, UdpSocket};

    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ipv4) if !ipv4.is_unspecified() => Some(ipv4.to_string()),
        _ => None,
    }
}

/// Process-wide identity record (§3 Agent identity).
pub struct AgentInfo {
    persistence: SqlitePersistence,
}

impl AgentInfo {
    pub async fn new(persistence: SqlitePersistence) -> Result<Self, AgentInfoError> {
        persistence
            .create_table(
                TABLE,
                &[
                    Column::new("id", "INTEGER").primary_key(),
                    Column::new("uuid", "TEXT").not_null(),
                    Column::new("key", "TEXT"),
                    Column::new("name", "TEXT"),
                ],
            )
            .await
            .map_err(AgentInfoError::Persistence)?;
        persistence
            .create_table(GROUP_TABLE, &[Column::new("id", "INTEGER").primary_key(), Column::new("name", "TEXT").not_null()])
            .await
            .map_err(AgentInfoError::Persistence)?;

        let info = Self { persistence };
        info.ensure_uuid().await?;
        Ok(info)
    }

    async fn ensure_uuid(&self) -> Result<(), AgentInfoError> {
        if self.uuid().await?.is_some() {
            return Ok(());
        }
        let uuid = uuid::Uuid::new_v4().to_string();
        let mut row = Row::new();
        row.insert("id".to_owned(), Value::Integer(1));
        row.insert("uuid".to_owned(), Value::Text(uuid));
        row.insert("key".to_owned(), Value::Null);
        row.insert("name".to_owned(), Value::Null);
        self.persistence.insert(TABLE, &row).await.map_err(AgentInfoError::Persistence)?;
        Ok(())
    }

    async fn single_row(&self) -> Result<Option<Row>, AgentInfoError> {
        let rows = self.persistence.select(TABLE, &[], None, None, Some(1)).await.map_err(AgentInfoError::Persistence)?;
        Ok(rows.into_iter().next())
    }

    pub async fn uuid(&self) -> Result<Option<String>, AgentInfoError> {
        Ok(self.single_row().await?.and_then(|row| match row.get("uuid") {
            Some(Value::Text(s)) => Some(s.clone()),
            _ => None,
        }))
    }

    pub async fn key(&self) -> Result<Option<String>, AgentInfoError> {
        Ok(self.single_row().await?.and_then(|row| match row.get("key") {
            Some(Value::Text(s)) => Some(s.clone()),
            _ => None,
        }))
    }

    pub async fn name(&self) -> Result<Option<String>, AgentInfoError> {
        Ok(self.single_row().await?.and_then(|row| match row.get("name") {
            Some(Value::Text(s)) => Some(s.clone()),
            _ => None,
        }))
    }

    pub async fn groups(&self) -> Result<Vec<String>, AgentInfoError> {
        let rows = self.persistence.select(GROUP_TABLE, &["name"], None, None, None).await.map_err(AgentInfoError::Persistence)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.get("name") {
                Some(Value::Text(s)) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    /// Set the registration key, validating it is exactly 32 alphanumeric
    /// characters; an empty input generates a fresh random key (§4.L).
    pub async fn set_key(&self, key: Option<&str>) -> Result<String, AgentInfoError> {
        let key = match key {
            Some(k) if !k.is_empty() => {
                if !is_valid_key(k) {
                    return Err(AgentInfoError::InvalidKey);
                }
                k.to_owned()
            }
            _ => generate_key(),
        };
        let mut fields = Row::new();
        fields.insert("key".to_owned(), Value::Text(key.clone()));
        self.persistence.update(TABLE, &fields, &Criteria::and().with("id", Op::Eq, 1i64)).await.map_err(AgentInfoError::Persistence)?;
        Ok(key)
    }

    pub async fn set_name(&self, name: &str) -> Result<(), AgentInfoError> {
        let mut fields = Row::new();
        fields.insert("name".to_owned(), Value::Text(name.to_owned()));
        self.persistence.update(TABLE, &fields, &Criteria::and().with("id", Op::Eq, 1i64)).await.map_err(AgentInfoError::Persistence)?;
        Ok(())
    }

    pub async fn set_groups(&self, names: &[String]) -> Result<(), AgentInfoError> {
        self.persistence.remove(GROUP_TABLE, &Criteria::and()).await.map_err(AgentInfoError::Persistence)?;
        for name in names {
            let mut row = Row::new();
            row.insert("name".to_owned(), Value::Text(name.clone()));
            self.persistence.insert(GROUP_TABLE, &row).await.map_err(AgentInfoError::Persistence)?;
        }
        Ok(())
    }

    /// `<product>/<version> (<type>; <arch>; <platform>)` (§4.L).
    pub fn user_agent(&self, endpoint: &EndpointInfo) -> String {
        format!("{PRODUCT}/{VERSION} (Endpoint; {}; {})", endpoint.arch, endpoint.platform)
    }

    /// Metadata document combining endpoint info, type, version, groups,
    /// UUID and optional key — the body sent to `POST /agents` (§4.L).
    pub async fn metadata_document(&self) -> Result<serde_json::Value, AgentInfoError> {
        let endpoint = EndpointInfo::collect();
        Ok(serde_json::json!({
            "type": "Endpoint",
            "version": VERSION,
            "uuid": self.uuid().await?,
            "key": self.key().await?,
            "name": self.name().await?,
            "groups": self.groups().await?,
            "os": endpoint.os,
            "platform": endpoint.platform,
            "arch": endpoint.arch,
            "ipv4": endpoint.ipv4,
        }))
    }

    /// `authenticate_with_user_password` → `POST /agents` with the
    /// metadata document and the token as bearer; 201 persists, anything
    /// else fails (§4.L Enroll()).
    pub async fn enroll(&self, http: &HttpClient, server_url: &str, user: &str, password: &str) -> Result<(), AgentInfoError> {
        let bearer = http.authenticate_with_user_password(server_url, user, password).await.ok_or(AgentInfoError::AuthenticationFailed)?;

        let body = self.metadata_document().await?;
        let url = reqwest::Url::parse(server_url).map_err(|_| AgentInfoError::EnrollmentFailed(0))?;
        let params = RequestParams {
            method: reqwest::Method::POST,
            host: url.host_str().unwrap_or_default().to_owned(),
            port: url.port(),
            endpoint: "/agents".to_owned(),
            tls: url.scheme() == "https",
            auth: Auth::Bearer(bearer),
            body: Some(body),
            verification_mode: VerificationMode::Full,
            user_agent: self.user_agent(&EndpointInfo::collect()),
            request_timeout: std::time::Duration::from_secs(30),
        };

        let (status, _body) = http.perform(&params).await.map_err(|err: HttpError| AgentInfoError::Http(err))?;
        if status != 201 {
            return Err(AgentInfoError::EnrollmentFailed(status));
        }
        Ok(())
    }
}

fn is_valid_key(key: &str) -> bool {
    key.len() == KEY_LEN && key.chars().all(|c| c.is_ascii_alphanumeric())
}

fn generate_key() -> String {
    let mut rng = rand::rng();
    (0..KEY_LEN).map(|_| KEY_ALPHABET[rng.random_range(0..KEY_ALPHABET.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_synthesizes_a_uuid() {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let info = AgentInfo::new(persistence).await.unwrap_or_else(|e| panic!("new: {e}"));
        let uuid = info.uuid().await.unwrap_or(None);
        assert!(uuid.is_some());
    }

    #[tokio::test]
    async fn set_key_rejects_invalid_length() {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let info = AgentInfo::new(persistence).await.unwrap_or_else(|e| panic!("new: {e}"));
        let result = info.set_key(Some("too-short")).await;
        assert!(matches!(result, Err(AgentInfoError::InvalidKey)));
    }

    #[tokio::test]
    async fn set_key_generates_when_empty() {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let info = AgentInfo::new(persistence).await.unwrap_or_else(|e| panic!("new: {e}"));
        let key = info.set_key(None).await.unwrap_or_else(|e| panic!("set_key: {e}"));
        assert_eq!(key.len(), KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn metadata_document_includes_identity_fields() {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let info = AgentInfo::new(persistence).await.unwrap_or_else(|e| panic!("new: {e}"));
        info.set_name("endpoint-01").await.unwrap_or_else(|e| panic!("set_name: {e}"));

        let doc = info.metadata_document().await.unwrap_or_else(|e| panic!("metadata: {e}"));
        assert_eq!(doc["type"], "Endpoint");
        assert_eq!(doc["name"], "endpoint-01");
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration: CLI surface (§6) plus the YAML config file
//! (`agent` / `events` / per-module sections).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::VerificationMode;

/// Default manager URL used when the config file omits `agent.server_url`.
pub const DEFAULT_SERVER_URL: &str = "https://localhost:55000";
/// Default retry interval (ms) between failed requests.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 10_000;
/// Default batch interval (ms) between event pushes.
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 5_000;
/// Default batch size (bytes) for a single event push.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

const MIN_BATCH_INTERVAL_MS: u64 = 1_000;
const MAX_BATCH_INTERVAL_MS: u64 = 60 * 60 * 1_000;
const MIN_BATCH_SIZE: usize = 1_000;
const MAX_BATCH_SIZE: usize = 1_000_000;

/// CLI surface (§6), parsed by the binary entrypoint. Kept intentionally
/// thin — argument parsing itself is an out-of-scope external collaborator
/// per spec §1; this struct only carries the options the core runtime and
/// enrollment flow need to act on.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "agentd", about = "Endpoint agent core runtime")]
pub struct Cli {
    /// Run in the foreground (default behavior when no other action is given).
    #[arg(long)]
    pub run: bool,

    /// Print `running` or `stopped` and exit.
    #[arg(long)]
    pub status: bool,

    /// Override the config file path.
    #[arg(long, value_name = "path")]
    pub config_file: Option<PathBuf>,

    /// Run enrollment against the manager, then exit.
    #[arg(long)]
    pub register_agent: bool,

    /// Manager URL, required with `--register-agent`.
    #[arg(long)]
    pub url: Option<String>,

    /// Enrollment username, required with `--register-agent`.
    #[arg(long)]
    pub user: Option<String>,

    /// Enrollment password, required with `--register-agent`.
    #[arg(long)]
    pub password: Option<String>,

    /// Registration key (32 alphanumeric chars). Generated if omitted.
    #[arg(long)]
    pub key: Option<String>,

    /// Agent display name.
    #[arg(long)]
    pub name: Option<String>,

    /// TLS verification mode.
    #[arg(long, value_enum, default_value = "full")]
    pub verification_mode: VerificationMode,
}

impl Cli {
    /// Validate the option combination required for `--register-agent`.
    pub fn validate(&self) -> Result<(), String> {
        if self.register_agent && (self.url.is_none() || self.user.is_none() || self.password.is_none()) {
            return Err("--register-agent requires --url, --user and --password".to_owned());
        }
        Ok(())
    }
}

/// `agent` section of the YAML config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub server_url: String,
    pub retry_interval: String,
    pub path: PathSection,
    pub verification_mode: VerificationMode,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            retry_interval: "10s".to_owned(),
            path: PathSection::default(),
            verification_mode: VerificationMode::Full,
        }
    }
}

/// `agent.path` subsection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSection {
    pub data: PathBuf,
    pub run: PathBuf,
}

impl Default for PathSection {
    fn default() -> Self {
        Self { data: PathBuf::from("/var/lib/agent"), run: PathBuf::from("/var/run/agent") }
    }
}

/// `events` section of the YAML config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    pub batch_interval: String,
    pub batch_size: String,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self { batch_interval: "5s".to_owned(), batch_size: "10KB".to_owned() }
    }
}

/// Top-level YAML config document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub events: EventsSection,
    /// Per-module configuration subtrees, passed through to `Module::setup`.
    #[serde(flatten)]
    pub modules: std::collections::BTreeMap<String, serde_yaml::Value>,
}

impl AgentConfig {
    /// Load and parse a YAML config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Resolved, clamped batch interval for the communicator.
    pub fn batch_interval(&self) -> Duration {
        let ms = parse_time_ms(&self.events.batch_interval).unwrap_or(DEFAULT_BATCH_INTERVAL_MS);
        Duration::from_millis(ms.clamp(MIN_BATCH_INTERVAL_MS, MAX_BATCH_INTERVAL_MS))
    }

    /// Resolved, clamped batch size (bytes) for the communicator.
    pub fn batch_size(&self) -> usize {
        let bytes = parse_size_bytes(&self.events.batch_size).unwrap_or(DEFAULT_BATCH_SIZE);
        bytes.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
    }

    /// Resolved retry interval for the communicator and HTTP client.
    pub fn retry_interval(&self) -> Duration {
        let ms = parse_time_ms(&self.agent.retry_interval).unwrap_or(DEFAULT_RETRY_INTERVAL_MS);
        Duration::from_millis(ms)
    }
}

/// Parse a time value with suffix `ms|s|m|h|d` (default unit: seconds) into milliseconds.
pub fn parse_time_ms(value: &str) -> Option<u64> {
    let value = value.trim();
    let (number, unit) = split_numeric_suffix(value);
    let number: f64 = number.parse().ok()?;
    let ms_per_unit: f64 = match unit {
        "ms" => 1.0,
        "" | "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        _ => return None,
    };
    Some((number * ms_per_unit).round() as u64)
}

/// Parse a size value with suffix `B|K[B]|M[B]|G[B]` (default unit: bytes) into bytes.
pub fn parse_size_bytes(value: &str) -> Option<usize> {
    let value = value.trim();
    let (number, unit) = split_numeric_suffix(value);
    let number: f64 = number.parse().ok()?;
    let bytes_per_unit: f64 = match unit.to_uppercase().as_str() {
        "" | "B" => 1.0,
        "K" | "KB" => 1_024.0,
        "M" | "MB" => 1_024.0 * 1_024.0,
        "G" | "GB" => 1_024.0 * 1_024.0 * 1_024.0,
        _ => return None,
    };
    Some((number * bytes_per_unit).round() as usize)
}

/// Split `"500ms"` into `("500", "ms")`, `"42"` into `("42", "")`.
fn split_numeric_suffix(value: &str) -> (&str, &str) {
    let split_at = value.find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-').unwrap_or(value.len());
    value.split_at(split_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_suffixes() {
        assert_eq!(parse_time_ms("500ms"), Some(500));
        assert_eq!(parse_time_ms("5s"), Some(5_000));
        assert_eq!(parse_time_ms("2m"), Some(120_000));
        assert_eq!(parse_time_ms("1h"), Some(3_600_000));
        assert_eq!(parse_time_ms("1d"), Some(86_400_000));
        assert_eq!(parse_time_ms("5"), Some(5_000));
    }

    #[test]
    fn parses_size_suffixes() {
        assert_eq!(parse_size_bytes("100B"), Some(100));
        assert_eq!(parse_size_bytes("10KB"), Some(10 * 1024));
        assert_eq!(parse_size_bytes("1M"), Some(1024 * 1024));
        assert_eq!(parse_size_bytes("1GB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size_bytes("100"), Some(100));
    }

    #[test]
    fn batch_interval_is_clamped() {
        let mut config = AgentConfig::default();
        config.events.batch_interval = "1ms".to_owned();
        assert_eq!(config.batch_interval(), Duration::from_secs(1));

        config.events.batch_interval = "2d".to_owned();
        assert_eq!(config.batch_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn batch_size_is_clamped() {
        let mut config = AgentConfig::default();
        config.events.batch_size = "1B".to_owned();
        assert_eq!(config.batch_size(), MIN_BATCH_SIZE);

        config.events.batch_size = "100MB".to_owned();
        assert_eq!(config.batch_size(), MAX_BATCH_SIZE);
    }
}

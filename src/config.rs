//! Process configuration, loaded once at startup.
//!
//! Values come from the environment (a `.env` file is honoured) and are
//! parsed into typed structs that are handed to constructors explicitly.

use crate::error::{DashboardError, Result};
use alloy::json_abi::JsonAbi;
use reqwest::Url;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PROVIDER_URL: &str = "http://localhost:8545";
pub const DEFAULT_NETWORK: &str = "development";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Where the node lives and which contract to read.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub provider_url: Url,
    pub network_name: String,
    /// Expected chain id. `None` accepts any node.
    pub chain_id: Option<u64>,
    pub contract_address: String,
    pub abi: JsonAbi,
}

/// Poll loop tuning.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Deadline for one whole poll cycle.
    pub request_timeout: Option<Duration>,
    /// Immediate retries of recoverable network errors within a cycle.
    pub max_retries: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl PollerConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub poller: PollerConfig,
}

impl Config {
    /// Loads `.env` (if any) and reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider_url = var("DASHBOARD_PROVIDER_URL")
            .unwrap_or_else(|| DEFAULT_PROVIDER_URL.to_string());
        let provider_url = Url::parse(&provider_url).map_err(|e| {
            DashboardError::config(format!("invalid provider url `{provider_url}`: {e}"))
        })?;

        let network_name = var("DASHBOARD_NETWORK").unwrap_or_else(|| DEFAULT_NETWORK.to_string());

        let chain_id = match var("DASHBOARD_CHAIN_ID") {
            None => None,
            Some(id) if id.trim() == "*" => None,
            Some(id) => Some(parse_number::<u64>("DASHBOARD_CHAIN_ID", &id)?),
        };

        let contract_address = var("DASHBOARD_CONTRACT_ADDRESS")
            .ok_or_else(|| DashboardError::config("DASHBOARD_CONTRACT_ADDRESS is not set"))?;

        let abi_path = var("DASHBOARD_ABI_PATH")
            .ok_or_else(|| DashboardError::config("DASHBOARD_ABI_PATH is not set"))?;
        let abi = load_abi(&abi_path)?;

        let mut poller = PollerConfig::default();
        if let Some(secs) = var("DASHBOARD_POLL_INTERVAL_SECS") {
            let secs = parse_number::<u64>("DASHBOARD_POLL_INTERVAL_SECS", &secs)?;
            if secs == 0 {
                return Err(DashboardError::config(
                    "DASHBOARD_POLL_INTERVAL_SECS must be greater than zero",
                ));
            }
            poller.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = var("DASHBOARD_REQUEST_TIMEOUT_SECS") {
            let secs = parse_number::<u64>("DASHBOARD_REQUEST_TIMEOUT_SECS", &secs)?;
            if secs == 0 {
                return Err(DashboardError::config(
                    "DASHBOARD_REQUEST_TIMEOUT_SECS must be greater than zero",
                ));
            }
            poller.request_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(retries) = var("DASHBOARD_MAX_RETRIES") {
            poller.max_retries = parse_number::<usize>("DASHBOARD_MAX_RETRIES", &retries)?;
        }

        Ok(Self {
            endpoint: EndpointConfig {
                provider_url,
                network_name,
                chain_id,
                contract_address,
                abi,
            },
            poller,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| DashboardError::config(format!("{key}=`{value}` is not a valid number: {e}")))
}

/// Reads an ABI from disk.
///
/// Accepts either a bare ABI array or a build artifact object carrying the
/// ABI under an `abi` key.
pub fn load_abi(path: impl AsRef<Path>) -> Result<JsonAbi> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        DashboardError::config(format!("failed to read abi file {}: {e}", path.display()))
    })?;
    parse_abi(&raw)
}

pub fn parse_abi(raw: &str) -> Result<JsonAbi> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| DashboardError::config(format!("abi is not valid json: {e}")))?;
    let value = match value {
        serde_json::Value::Object(mut artifact) => artifact
            .remove("abi")
            .ok_or_else(|| DashboardError::config("abi artifact has no `abi` key"))?,
        other => other,
    };
    serde_json::from_value(value)
        .map_err(|e| DashboardError::config(format!("malformed abi descriptor: {e}")))
}

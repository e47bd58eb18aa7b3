//! Configuration: process settings from the environment, detection and
//! response policies from YAML files.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

const DEFAULT_RULES_PATH: &str = "config/detection_rules.yaml";
const DEFAULT_RESPONSE_PATH: &str = "config/response_rules.yaml";

/// Process-wide settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub project_name: String,
    pub api_v1_str: String,
    pub bind_address: String,
    pub redis_url: String,
    pub elasticsearch_url: String,
    pub ipinfo_base_url: String,
    pub ipinfo_token: String,
    pub abuseipdb_base_url: String,
    pub abuseipdb_api_key: String,
    pub rate_limit_per_minute: u64,
    pub rules_config_path: String,
    pub response_config_path: String,
    pub model_path: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            project_name: env::var("PROJECT_NAME")
                .unwrap_or_else(|_| "Aegis SIEM Detection Pipeline".to_string()),
            api_v1_str: env::var("API_V1_STR").unwrap_or_else(|_| "/api/v1".to_string()),
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379/0".to_string()),
            elasticsearch_url: env::var("ELASTICSEARCH_URL")
                .unwrap_or_else(|_| "http://localhost:9200".to_string()),
            ipinfo_base_url: env::var("IPINFO_BASE_URL")
                .unwrap_or_else(|_| "https://ipinfo.io".to_string()),
            ipinfo_token: env::var("IPINFO_TOKEN").unwrap_or_default(),
            abuseipdb_base_url: env::var("ABUSEIPDB_BASE_URL")
                .unwrap_or_else(|_| "https://api.abuseipdb.com".to_string()),
            abuseipdb_api_key: env::var("ABUSEIPDB_API_KEY").unwrap_or_default(),
            rate_limit_per_minute: env::var("RATE_LIMIT_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            rules_config_path: env::var("RULES_CONFIG_PATH")
                .unwrap_or_else(|_| DEFAULT_RULES_PATH.to_string()),
            response_config_path: env::var("RESPONSE_CONFIG_PATH")
                .unwrap_or_else(|_| DEFAULT_RESPONSE_PATH.to_string()),
            model_path: env::var("MODEL_PATH").unwrap_or_else(|_| "model.json".to_string()),
        }
    }
}

// Default value functions
fn default_enabled() -> bool {
    true
}
fn default_window_seconds() -> u64 {
    60
}
fn default_threshold() -> u64 {
    5
}
fn default_admin_users() -> Vec<String> {
    vec!["root".to_string(), "admin".to_string(), "ubuntu".to_string()]
}
fn default_brute_severity() -> String {
    "HIGH".to_string()
}
fn default_sudo_severity() -> String {
    "MEDIUM".to_string()
}
fn default_admin_severity() -> String {
    "CRITICAL".to_string()
}
fn default_block_threshold() -> u32 {
    80
}
fn default_block_duration() -> u64 {
    300
}

/// `rules:` section of the detection config.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rules: RuleSet,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleSet {
    #[serde(default)]
    pub ssh_brute_force: BruteForceRule,
    #[serde(default)]
    pub sudo_usage: SudoRule,
    #[serde(default)]
    pub suspicious_admin: SuspiciousAdminRule,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BruteForceRule {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_brute_severity")]
    pub severity: String,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_threshold")]
    pub threshold: u64,
}

impl Default for BruteForceRule {
    fn default() -> Self {
        BruteForceRule {
            enabled: true,
            severity: default_brute_severity(),
            window_seconds: default_window_seconds(),
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SudoRule {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_sudo_severity")]
    pub severity: String,
}

impl Default for SudoRule {
    fn default() -> Self {
        SudoRule {
            enabled: true,
            severity: default_sudo_severity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuspiciousAdminRule {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_admin_severity")]
    pub severity: String,
    #[serde(default = "default_admin_users")]
    pub admin_users: Vec<String>,
}

impl Default for SuspiciousAdminRule {
    fn default() -> Self {
        SuspiciousAdminRule {
            enabled: true,
            severity: default_admin_severity(),
            admin_users: default_admin_users(),
        }
    }
}

/// Response policy config: whitelist CIDRs plus block policy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResponseConfig {
    #[serde(default)]
    pub whitelist: WhitelistConfig,
    #[serde(default)]
    pub policy: BlockPolicy,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WhitelistConfig {
    #[serde(default)]
    pub cidrs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlockPolicy {
    #[serde(default = "default_block_threshold")]
    pub block_threshold: u32,
    #[serde(default = "default_block_duration")]
    pub block_duration_seconds: u64,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        BlockPolicy {
            block_threshold: default_block_threshold(),
            block_duration_seconds: default_block_duration(),
        }
    }
}

fn load_yaml<T: serde::de::DeserializeOwned + Default>(path: &str) -> Result<T> {
    if !Path::new(path).exists() {
        tracing::warn!("Config file not found at {}, using defaults", path);
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content)
        .map_err(|e| PipelineError::config(format!("Failed to parse {}: {}", path, e)))
}

impl RulesConfig {
    pub fn load(path: &str) -> Result<Self> {
        load_yaml(path)
    }
}

impl ResponseConfig {
    pub fn load(path: &str) -> Result<Self> {
        load_yaml(path)
    }
}

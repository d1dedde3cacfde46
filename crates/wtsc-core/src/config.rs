use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::logging::LogFormat;
use crate::validate;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

// ---------------------------------------------------------------------------
// ServiceStake
// ---------------------------------------------------------------------------

/// Minimum number of nodes the recommendation service should keep on a
/// service (chain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStake {
    pub service: String,
    #[serde(default)]
    pub min_node: u32,
}

// ---------------------------------------------------------------------------
// TxFee
// ---------------------------------------------------------------------------

/// Transaction fee in upokt. Kept as the raw text from the file so that a
/// malformed value is reported by validation as `tx_fee` instead of failing
/// the whole parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TxFee(pub String);

impl TxFee {
    /// The fee when it is a positive integer.
    pub fn amount(&self) -> Option<u64> {
        self.0.trim().parse::<u64>().ok().filter(|fee| *fee > 0)
    }
}

impl<'de> Deserialize<'de> for TxFee {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(TxFee(match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Query and persist results, but never broadcast.
    pub dry_mode: bool,
    pub poktscan_api: String,
    pub poktscan_api_token: String,
    /// `mainnet` or `testnet`.
    pub network_id: String,
    pub tx_memo: String,
    pub tx_fee: TxFee,
    /// Servicer domain sent to the recommendation service.
    pub domain: String,
    #[serde(alias = "chain_pool")]
    pub service_pool: Vec<String>,
    pub servicer_keys: Vec<String>,
    pub stake_weight: u32,
    pub min_increase_percent: f64,
    pub min_service_stake: Vec<ServiceStake>,
    /// Hours of relay history considered by the recommendation service.
    pub time_period: u32,
    /// Directory for raw recommendation results. Empty disables it.
    pub results_path: String,
    pub log_level: String,
    pub log_format: String,
    /// `@every <duration>`, a `@daily`-style descriptor, or five-field cron.
    pub schedule: String,
    pub max_workers: usize,
    pub pocket_rpc: String,
    pub max_retries: u32,
    /// Per-request timeout in milliseconds.
    pub max_timeout: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("dry_mode", &self.dry_mode)
            .field("poktscan_api", &self.poktscan_api)
            .field("poktscan_api_token", &"<redacted>")
            .field("network_id", &self.network_id)
            .field("tx_memo", &self.tx_memo)
            .field("tx_fee", &self.tx_fee)
            .field("domain", &self.domain)
            .field("service_pool", &self.service_pool)
            .field("servicer_keys", &format!("<{} redacted>", self.servicer_keys.len()))
            .field("stake_weight", &self.stake_weight)
            .field("min_increase_percent", &self.min_increase_percent)
            .field("min_service_stake", &self.min_service_stake)
            .field("time_period", &self.time_period)
            .field("results_path", &self.results_path)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("schedule", &self.schedule)
            .field("max_workers", &self.max_workers)
            .field("pocket_rpc", &self.pocket_rpc)
            .field("max_retries", &self.max_retries)
            .field("max_timeout", &self.max_timeout)
            .finish()
    }
}

impl Config {
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    /// Validate every field and return the names of the offending keys, in
    /// declaration order. Relative `results_path` values are resolved
    /// against `project_root`.
    pub fn validate(&self, project_root: &Path) -> Vec<&'static str> {
        validate::invalid_keys(self, project_root)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout)
    }

    pub fn log_format(&self) -> LogFormat {
        LogFormat::from_str(&self.log_format).unwrap_or_default()
    }

    /// Directory for persisted results, if enabled.
    pub fn results_dir(&self, project_root: &Path) -> Option<PathBuf> {
        if self.results_path.is_empty() {
            None
        } else {
            Some(project_root.join(&self.results_path))
        }
    }

    /// Field-by-field comparison against `next`. List fields compare as
    /// sets; `min_service_stake` compares per service.
    pub fn diff(&self, next: &Config) -> ChangedKeys {
        let mut keys = ChangedKeys::default();
        let mut check = |key: &'static str, changed: bool| {
            if changed {
                keys.push(key);
            }
        };
        check("dry_mode", self.dry_mode != next.dry_mode);
        check("poktscan_api", self.poktscan_api != next.poktscan_api);
        check(
            "poktscan_api_token",
            self.poktscan_api_token != next.poktscan_api_token,
        );
        check("network_id", self.network_id != next.network_id);
        check("tx_memo", self.tx_memo != next.tx_memo);
        check("tx_fee", self.tx_fee != next.tx_fee);
        check("domain", self.domain != next.domain);
        check(
            "service_pool",
            !same_set(&self.service_pool, &next.service_pool),
        );
        check(
            "servicer_keys",
            !same_set(&self.servicer_keys, &next.servicer_keys),
        );
        check("stake_weight", self.stake_weight != next.stake_weight);
        check(
            "min_increase_percent",
            self.min_increase_percent != next.min_increase_percent,
        );
        check(
            "min_service_stake",
            !same_service_stakes(&self.min_service_stake, &next.min_service_stake),
        );
        check("time_period", self.time_period != next.time_period);
        check("results_path", self.results_path != next.results_path);
        check("log_level", self.log_level != next.log_level);
        check("log_format", self.log_format != next.log_format);
        check("schedule", self.schedule != next.schedule);
        check("max_workers", self.max_workers != next.max_workers);
        check("pocket_rpc", self.pocket_rpc != next.pocket_rpc);
        check("max_retries", self.max_retries != next.max_retries);
        check("max_timeout", self.max_timeout != next.max_timeout);
        keys
    }

    /// Copy a single field from `next`. Unknown keys are ignored.
    pub fn apply_field(&mut self, next: &Config, key: &str) {
        match key {
            "dry_mode" => self.dry_mode = next.dry_mode,
            "poktscan_api" => self.poktscan_api = next.poktscan_api.clone(),
            "poktscan_api_token" => self.poktscan_api_token = next.poktscan_api_token.clone(),
            "network_id" => self.network_id = next.network_id.clone(),
            "tx_memo" => self.tx_memo = next.tx_memo.clone(),
            "tx_fee" => self.tx_fee = next.tx_fee.clone(),
            "domain" => self.domain = next.domain.clone(),
            "service_pool" => self.service_pool = next.service_pool.clone(),
            "servicer_keys" => self.servicer_keys = next.servicer_keys.clone(),
            "stake_weight" => self.stake_weight = next.stake_weight,
            "min_increase_percent" => self.min_increase_percent = next.min_increase_percent,
            "min_service_stake" => self.min_service_stake = next.min_service_stake.clone(),
            "time_period" => self.time_period = next.time_period,
            "results_path" => self.results_path = next.results_path.clone(),
            "log_level" => self.log_level = next.log_level.clone(),
            "log_format" => self.log_format = next.log_format.clone(),
            "schedule" => self.schedule = next.schedule.clone(),
            "max_workers" => self.max_workers = next.max_workers,
            "pocket_rpc" => self.pocket_rpc = next.pocket_rpc.clone(),
            "max_retries" => self.max_retries = next.max_retries,
            "max_timeout" => self.max_timeout = next.max_timeout,
            _ => {}
        }
    }
}

fn same_set(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}

fn same_service_stakes(a: &[ServiceStake], b: &[ServiceStake]) -> bool {
    let a: HashMap<&str, u32> = a.iter().map(|s| (s.service.as_str(), s.min_node)).collect();
    let b: HashMap<&str, u32> = b.iter().map(|s| (s.service.as_str(), s.min_node)).collect();
    a == b
}

// ---------------------------------------------------------------------------
// ChangedKeys
// ---------------------------------------------------------------------------

/// Ordered set of config keys that differ between two loads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedKeys(Vec<&'static str>);

impl ChangedKeys {
    pub fn push(&mut self, key: &'static str) {
        if !self.0.contains(&key) {
            self.0.push(key);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|k| *k == key)
    }

    pub fn contains_any(&self, keys: &[&str]) -> bool {
        keys.iter().any(|k| self.contains(k))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[&'static str] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// ConfigSource
// ---------------------------------------------------------------------------

/// Where the config file lives. Startup and every reload read from here.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    project_root: PathBuf,
    path: PathBuf,
}

impl ConfigSource {
    /// `<project_root or cwd>/<file_name or config.json>`.
    pub fn new(project_root: Option<PathBuf>, file_name: Option<&Path>) -> Self {
        let project_root = project_root
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = file_name.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        Self {
            path: project_root.join(file_name),
            project_root,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Read, parse and validate. Any failure rejects the whole file.
    pub fn load(&self) -> Result<Config, ConfigError> {
        info!(path = %self.path.display(), "reading config file");
        if !self.path.exists() {
            return Err(ConfigError::NotFound(self.path.clone()));
        }
        let data = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        let config = Config::from_json(&data).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let invalid = config.validate(&self.project_root);
        if !invalid.is_empty() {
            return Err(ConfigError::Invalid {
                path: self.path.clone(),
                keys: invalid.into_iter().map(String::from).collect(),
            });
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{PxhError, Result};
use crate::core::tier::Tier;

/// Full harness configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub pool: PoolConfig,
    pub trial: TrialConfig,
    pub reclaim: ReclaimConfig,
    pub logs: LogsConfig,
    pub workload: WorkloadConfig,
    pub remote: RemoteConfig,
    pub paths: PathsConfig,
}

/// Pool creation and the management CLIs used to drive it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Requested pool size in bytes. `0` asks for all available capacity.
    pub size_bytes: u64,
    /// Property toggled before the loop to stop background aggregation.
    pub reclaim_property: String,
    pub reclaim_disabled_value: String,
    pub dmg_bin: String,
    pub daos_bin: String,
}

/// Trial loop shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrialConfig {
    pub iterations: u32,
    pub tier: Tier,
    /// First fill of each trial; must succeed.
    pub nominal_fill_pct: f64,
    /// Second fill of each trial; must be rejected for lack of space.
    pub overfill_pct: f64,
    /// Smoke fill after the last trial; must succeed.
    pub final_fill_pct: f64,
}

/// How long to wait for asynchronous reclamation after teardown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReclaimStrategy {
    /// Sleep `settle_secs` once, then measure.
    Fixed,
    /// Measure every `poll_interval_ms` until the threshold holds or `settle_secs` elapse.
    Poll,
}

impl FromStr for ReclaimStrategy {
    type Err = PxhError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "poll" => Ok(Self::Poll),
            other => Err(PxhError::InvalidArgument {
                details: format!("unknown reclaim strategy {other:?} (expected fixed or poll)"),
            }),
        }
    }
}

/// Post-teardown reclamation check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReclaimConfig {
    pub strategy: ReclaimStrategy,
    pub high_water_free_pct: f64,
    pub settle_secs: u64,
    pub poll_interval_ms: u64,
}

/// Client log collection and classification markers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogsConfig {
    pub client_hosts: Vec<String>,
    /// Logical log name, resolved against `log_dir` unless absolute.
    pub client_log: String,
    pub log_dir: PathBuf,
    /// Lines containing this marker are collected from the log.
    pub error_marker: String,
    /// Collected lines containing this marker are the expected exhaustion signal.
    pub exhaustion_marker: String,
}

/// Write workload generator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkloadConfig {
    pub ior_bin: String,
    /// Regex matched against failed workload output to recognize a capacity rejection.
    pub capacity_exceeded_pattern: String,
    pub scm_transfer_bytes: u64,
    pub nvme_transfer_bytes: u64,
    pub object_class: String,
    pub extra_args: Vec<String>,
}

/// Remote execution transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub ssh_bin: String,
    pub connect_timeout_secs: u64,
}

/// Filesystem paths used by pxh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size_bytes: 0,
            reclaim_property: "reclaim".to_string(),
            reclaim_disabled_value: "disabled".to_string(),
            dmg_bin: "dmg".to_string(),
            daos_bin: "daos".to_string(),
        }
    }
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            tier: Tier::Scm,
            nominal_fill_pct: 75.0,
            overfill_pct: 10.0,
            final_fill_pct: 1.0,
        }
    }
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            strategy: ReclaimStrategy::Poll,
            high_water_free_pct: 95.0,
            settle_secs: 60,
            poll_interval_ms: 5_000,
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            client_hosts: vec!["localhost".to_string()],
            client_log: "daos_client.log".to_string(),
            log_dir: PathBuf::from("/var/tmp/daos_testing"),
            error_marker: "ERR".to_string(),
            exhaustion_marker: "DER_NOSPACE".to_string(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            ior_bin: "ior".to_string(),
            capacity_exceeded_pattern: r"DER_NOSPACE|No space left on device|-1007\b".to_string(),
            scm_transfer_bytes: 2 * 1024,
            nvme_transfer_bytes: 1024 * 1024,
            object_class: "SX".to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_bin: "ssh".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[PXH-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("pxh").join("config.toml"),
            jsonl_log: home_dir
                .join(".local")
                .join("share")
                .join("pxh")
                .join("runs.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| PxhError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(PxhError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the run log.
    ///
    /// FNV-1a so the value is stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // pool
        if let Some(raw) = lookup("PXH_POOL_SIZE_BYTES") {
            self.pool.size_bytes = parse_env("PXH_POOL_SIZE_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("PXH_POOL_DMG_BIN") {
            self.pool.dmg_bin = raw;
        }
        if let Some(raw) = lookup("PXH_POOL_DAOS_BIN") {
            self.pool.daos_bin = raw;
        }

        // trial
        if let Some(raw) = lookup("PXH_TRIAL_ITERATIONS") {
            self.trial.iterations = parse_env("PXH_TRIAL_ITERATIONS", &raw)?;
        }
        if let Some(raw) = lookup("PXH_TRIAL_TIER") {
            self.trial.tier = parse_env("PXH_TRIAL_TIER", &raw)?;
        }
        if let Some(raw) = lookup("PXH_TRIAL_NOMINAL_FILL_PCT") {
            self.trial.nominal_fill_pct = parse_env("PXH_TRIAL_NOMINAL_FILL_PCT", &raw)?;
        }
        if let Some(raw) = lookup("PXH_TRIAL_OVERFILL_PCT") {
            self.trial.overfill_pct = parse_env("PXH_TRIAL_OVERFILL_PCT", &raw)?;
        }
        if let Some(raw) = lookup("PXH_TRIAL_FINAL_FILL_PCT") {
            self.trial.final_fill_pct = parse_env("PXH_TRIAL_FINAL_FILL_PCT", &raw)?;
        }

        // reclaim
        if let Some(raw) = lookup("PXH_RECLAIM_STRATEGY") {
            self.reclaim.strategy = parse_env("PXH_RECLAIM_STRATEGY", &raw)?;
        }
        if let Some(raw) = lookup("PXH_RECLAIM_HIGH_WATER_FREE_PCT") {
            self.reclaim.high_water_free_pct = parse_env("PXH_RECLAIM_HIGH_WATER_FREE_PCT", &raw)?;
        }
        if let Some(raw) = lookup("PXH_RECLAIM_SETTLE_SECS") {
            self.reclaim.settle_secs = parse_env("PXH_RECLAIM_SETTLE_SECS", &raw)?;
        }
        if let Some(raw) = lookup("PXH_RECLAIM_POLL_INTERVAL_MS") {
            self.reclaim.poll_interval_ms = parse_env("PXH_RECLAIM_POLL_INTERVAL_MS", &raw)?;
        }

        // logs
        if let Some(raw) = lookup("PXH_LOGS_CLIENT_HOSTS") {
            self.logs.client_hosts = raw
                .split(',')
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(raw) = lookup("PXH_LOGS_CLIENT_LOG") {
            self.logs.client_log = raw;
        }
        if let Some(raw) = lookup("PXH_LOGS_LOG_DIR") {
            self.logs.log_dir = PathBuf::from(raw);
        }

        // workload
        if let Some(raw) = lookup("PXH_WORKLOAD_IOR_BIN") {
            self.workload.ior_bin = raw;
        }

        // paths
        if let Some(raw) = lookup("PXH_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Drops repeated hosts, keeping the first occurrence so log output is
    /// concatenated in the order the hosts were given.
    fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.logs.client_hosts.retain(|host| seen.insert(host.clone()));
    }

    pub fn validate(&self) -> Result<()> {
        if self.trial.iterations == 0 {
            return Err(PxhError::InvalidConfig {
                details: "trial.iterations must be >= 1".to_string(),
            });
        }

        for (name, val) in [
            ("nominal_fill_pct", self.trial.nominal_fill_pct),
            ("overfill_pct", self.trial.overfill_pct),
            ("final_fill_pct", self.trial.final_fill_pct),
        ] {
            if !(val > 0.0 && val <= 100.0) {
                return Err(PxhError::InvalidConfig {
                    details: format!("trial.{name} must be in (0, 100], got {val}"),
                });
            }
        }

        if !(0.0..=100.0).contains(&self.reclaim.high_water_free_pct) {
            return Err(PxhError::InvalidConfig {
                details: format!(
                    "reclaim.high_water_free_pct must be in [0, 100], got {}",
                    self.reclaim.high_water_free_pct
                ),
            });
        }

        if self.reclaim.strategy == ReclaimStrategy::Poll && self.reclaim.poll_interval_ms == 0 {
            return Err(PxhError::InvalidConfig {
                details: "reclaim.poll_interval_ms must be > 0 with the poll strategy".to_string(),
            });
        }

        if self.logs.client_hosts.is_empty() {
            return Err(PxhError::InvalidConfig {
                details: "logs.client_hosts must name at least one host".to_string(),
            });
        }

        if self.logs.error_marker.is_empty() || self.logs.exhaustion_marker.is_empty() {
            return Err(PxhError::InvalidConfig {
                details: "logs.error_marker and logs.exhaustion_marker must be non-empty"
                    .to_string(),
            });
        }

        if self.workload.scm_transfer_bytes == 0 || self.workload.nvme_transfer_bytes == 0 {
            return Err(PxhError::InvalidConfig {
                details: "workload transfer sizes must be > 0".to_string(),
            });
        }

        regex::Regex::new(&self.workload.capacity_exceeded_pattern)?;

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| PxhError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

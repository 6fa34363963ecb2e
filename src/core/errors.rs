//! PXH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::tier::Tier;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, PxhError>;

/// Broad failure class used for reporting and exit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad config or arguments; the run never started.
    Configuration,
    /// Remote command failure, unreachable pool, IO. Never part of the domain signal.
    Infrastructure,
    /// The system under test behaved differently from what the protocol requires.
    ContractViolation,
}

/// Top-level error type for the exhaustion harness.
#[derive(Debug, Error)]
pub enum PxhError {
    #[error("[PXH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[PXH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[PXH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[PXH-1101] invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("[PXH-2001] remote command `{command}` failed on {host} (exit {code}): {details}")]
    RemoteCommand {
        host: String,
        command: String,
        code: i32,
        details: String,
    },

    #[error("[PXH-2002] pool unreachable: {details}")]
    PoolUnreachable { details: String },

    #[error("[PXH-2003] pool command `{command}` failed (exit {code}): {details}")]
    PoolCommand {
        command: String,
        code: i32,
        details: String,
    },

    #[error("[PXH-2004] failed to destroy container {container}: {details}")]
    ContainerDestroy { container: String, details: String },

    #[error("[PXH-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[PXH-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[PXH-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[PXH-3900] runtime failure: {details}")]
    Runtime { details: String },

    #[error("[PXH-4001] contract violation: {0}")]
    Contract(#[from] ContractViolation),
}

/// Deviations of the pool from the exhaustion protocol. Every variant is fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("nominal fill of {pct}% on {tier} did not complete: {detail}")]
    NominalFillFailed { tier: Tier, pct: f64, detail: String },

    #[error(
        "overfill of {pct}% on {tier} was supposed to fail with capacity exceeded but Passed"
    )]
    OverfillAccepted { tier: Tier, pct: f64 },

    #[error("overfill of {pct}% on {tier} failed for a reason other than capacity: {detail}")]
    OverfillFailedUnexpectedly { tier: Tier, pct: f64, detail: String },

    #[error("found {count} other error line(s) in client log {log}")]
    UnexpectedLogErrors { count: u64, log: String },

    #[error("expected exhaustion signal count to be {expected} but found {found}")]
    SignalCountMismatch { expected: u64, found: u64 },

    #[error("{count} container(s) still listed after teardown: {containers:?}")]
    LeftoverContainers {
        count: usize,
        containers: Vec<String>,
    },

    #[error(
        "{tier} free space shrank across teardown: {before:.1}% before, {}% after",
        distinct_pct(.after, .before)
    )]
    FreeSpaceRegressed { tier: Tier, before: f64, after: f64 },

    #[error(
        "{tier} free space after teardown is {}%, expected at least {threshold:.1}%",
        distinct_pct(.free_pct, .threshold)
    )]
    ReclaimBelowThreshold {
        tier: Tier,
        free_pct: f64,
        threshold: f64,
    },

    #[error("smoke fill of {pct}% on {tier} after the trial loop did not complete: {detail}")]
    SmokeFillFailed { tier: Tier, pct: f64, detail: String },
}

/// `value` with one decimal, or as many more as it takes not to read the same
/// as `reference` at that precision.
#[allow(clippy::trivially_copy_pass_by_ref)]
fn distinct_pct(value: &f64, reference: &f64) -> String {
    for precision in 1..=6 {
        let shown = format!("{value:.precision$}");
        if shown != format!("{reference:.precision$}") {
            return shown;
        }
    }
    value.to_string()
}

impl PxhError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "PXH-1001",
            Self::MissingConfig { .. } => "PXH-1002",
            Self::ConfigParse { .. } => "PXH-1003",
            Self::InvalidArgument { .. } => "PXH-1101",
            Self::RemoteCommand { .. } => "PXH-2001",
            Self::PoolUnreachable { .. } => "PXH-2002",
            Self::PoolCommand { .. } => "PXH-2003",
            Self::ContainerDestroy { .. } => "PXH-2004",
            Self::Serialization { .. } => "PXH-2101",
            Self::Io { .. } => "PXH-3002",
            Self::ChannelClosed { .. } => "PXH-3003",
            Self::Runtime { .. } => "PXH-3900",
            Self::Contract(_) => "PXH-4001",
        }
    }

    /// Which side of the protocol the failure belongs to.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidConfig { .. }
            | Self::MissingConfig { .. }
            | Self::ConfigParse { .. }
            | Self::InvalidArgument { .. } => ErrorCategory::Configuration,
            Self::Contract(_) => ErrorCategory::ContractViolation,
            Self::RemoteCommand { .. }
            | Self::PoolUnreachable { .. }
            | Self::PoolCommand { .. }
            | Self::ContainerDestroy { .. }
            | Self::Serialization { .. }
            | Self::Io { .. }
            | Self::ChannelClosed { .. }
            | Self::Runtime { .. } => ErrorCategory::Infrastructure,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for PxhError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for PxhError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<regex::Error> for PxhError {
    fn from(value: regex::Error) -> Self {
        Self::InvalidConfig {
            details: format!("bad pattern: {value}"),
        }
    }
}

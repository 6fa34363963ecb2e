//! Write workload generators.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::process::Command;

use crate::cluster::pool::{ContainerHandle, PoolHandle};
use crate::core::config::WorkloadConfig;
use crate::core::errors::{PxhError, Result};
use crate::core::tier::Tier;

/// One bounded write into one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub pool: PoolHandle,
    pub container: ContainerHandle,
    pub tier: Tier,
    pub bytes: u64,
    pub transfer_bytes: u64,
}

/// Raw result of a workload run: exit status and merged output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadReport {
    pub exit_code: i32,
    pub output: String,
}

impl WorkloadReport {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Issues writes against a pool.
///
/// A workload that ran and failed returns `Ok` with a non-zero exit code; `Err`
/// means the workload could not be started at all.
pub trait Workload: Send + Sync {
    fn run(&self, spec: &WorkloadSpec) -> Result<WorkloadReport>;
}

/// IOR over the DFS API, write-only, keeping the file.
#[derive(Debug, Clone)]
pub struct IorWorkload {
    bin: String,
    object_class: String,
    extra_args: Vec<String>,
}

impl IorWorkload {
    #[must_use]
    pub fn new(config: &WorkloadConfig) -> Self {
        Self {
            bin: config.ior_bin.clone(),
            object_class: config.object_class.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    /// Command-line arguments for one run. The block size is the request
    /// rounded down to whole transfers, never less than one transfer.
    #[must_use]
    pub fn args(&self, spec: &WorkloadSpec) -> Vec<String> {
        let transfer = spec.transfer_bytes.max(1);
        let block = (spec.bytes / transfer).max(1) * transfer;
        let mut args = vec![
            "-a".to_string(),
            "DFS".to_string(),
            "-w".to_string(),
            "-k".to_string(),
            "-i".to_string(),
            "1".to_string(),
            "-s".to_string(),
            "1".to_string(),
            "-b".to_string(),
            block.to_string(),
            "-t".to_string(),
            transfer.to_string(),
            "-o".to_string(),
            "/testfile".to_string(),
            "--dfs.pool".to_string(),
            spec.pool.uuid.clone(),
            "--dfs.cont".to_string(),
            spec.container.to_string(),
            "--dfs.oclass".to_string(),
            self.object_class.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl Workload for IorWorkload {
    fn run(&self, spec: &WorkloadSpec) -> Result<WorkloadReport> {
        let output = Command::new(&self.bin)
            .args(self.args(spec))
            .output()
            .map_err(|source| PxhError::Io {
                path: PathBuf::from(&self.bin),
                source,
            })?;
        let mut merged = String::from_utf8_lossy(&output.stdout).to_string();
        merged.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(WorkloadReport {
            exit_code: output.status.code().unwrap_or(-1),
            output: merged,
        })
    }
}

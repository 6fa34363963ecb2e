//! `PoolService` backed by the `dmg` and `daos` management CLIs.
//!
//! Both tools are invoked with `-j` and answer with a JSON envelope of the form
//! `{"response": ..., "error": ..., "status": ...}`; only the fields the
//! harness consumes are modeled here.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::process::Command;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::cluster::pool::{
    CapacityReport, ContainerHandle, PoolHandle, PoolService, PoolSize, TierUsage,
};
use crate::core::config::PoolConfig;
use crate::core::errors::{PxhError, Result};
use crate::core::tier::Tier;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    status: i32,
}

#[derive(Debug, Deserialize)]
struct PoolCreateResponse {
    uuid: String,
    #[serde(default)]
    svc_reps: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct PoolQueryResponse {
    #[serde(default)]
    tier_stats: Vec<TierStat>,
}

#[derive(Debug, Deserialize)]
struct TierStat {
    total: u64,
    free: u64,
    media_type: String,
}

#[derive(Debug, Deserialize)]
struct ContainerCreateResponse {
    container_uuid: String,
}

#[derive(Debug, Deserialize)]
struct ContainerEntry {
    uuid: String,
}

/// Drives a DAOS-style system through its command-line tools.
#[derive(Debug, Clone)]
pub struct DmgPoolService {
    dmg_bin: String,
    daos_bin: String,
}

impl DmgPoolService {
    #[must_use]
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            dmg_bin: config.dmg_bin.clone(),
            daos_bin: config.daos_bin.clone(),
        }
    }
}

fn run_json<T: DeserializeOwned>(bin: &str, args: &[String]) -> Result<T> {
    let stdout = run_tool(bin, &prefixed_json(args))?;
    decode_envelope(&format!("{bin} {}", args.join(" ")), &stdout)
}

fn run_tool(bin: &str, args: &[String]) -> Result<String> {
    let output = Command::new(bin)
        .args(args)
        .output()
        .map_err(|source| PxhError::Io {
            path: PathBuf::from(bin),
            source,
        })?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if output.status.success() {
        Ok(stdout)
    } else {
        Err(PxhError::PoolCommand {
            command: format!("{bin} {}", args.join(" ")),
            code: output.status.code().unwrap_or(-1),
            details: if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            },
        })
    }
}

fn decode_envelope<T: DeserializeOwned>(command: &str, raw: &str) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_str(raw)?;
    if envelope.status != 0 || envelope.error.is_some() {
        return Err(PxhError::PoolCommand {
            command: command.to_string(),
            code: envelope.status,
            details: envelope.error.unwrap_or_default(),
        });
    }
    envelope.response.ok_or_else(|| PxhError::Serialization {
        context: "pool command envelope",
        details: format!("`{command}` returned no response body"),
    })
}

fn report_from_query(response: PoolQueryResponse) -> Result<CapacityReport> {
    let mut tiers = Vec::with_capacity(response.tier_stats.len());
    for stat in response.tier_stats {
        let tier: Tier = stat.media_type.parse()?;
        tiers.push((
            tier,
            TierUsage {
                total_bytes: stat.total,
                free_bytes: stat.free,
            },
        ));
    }
    Ok(CapacityReport::from_tiers(tiers))
}

fn pool_label() -> String {
    format!("pxh_{}", chrono::Utc::now().format("%Y%m%d%H%M%S"))
}

impl PoolService for DmgPoolService {
    fn create_pool(&self, size: PoolSize) -> Result<PoolHandle> {
        let label = pool_label();
        let size_arg = match size {
            PoolSize::Max => "--size=100%".to_string(),
            PoolSize::Bytes(bytes) => format!("--size={bytes}"),
        };
        let args = vec!["pool".to_string(), "create".to_string(), size_arg, label.clone()];
        let created: PoolCreateResponse = run_json(&self.dmg_bin, &args)?;
        Ok(PoolHandle {
            uuid: created.uuid,
            label,
            svc_ranks: created.svc_reps,
        })
    }

    fn set_property(&self, pool: &PoolHandle, name: &str, value: &str) -> Result<()> {
        run_tool(
            &self.dmg_bin,
            &[
                "pool".to_string(),
                "set-prop".to_string(),
                pool.uuid.clone(),
                format!("{name}:{value}"),
            ],
        )
        .map(|_| ())
    }

    fn query_space(&self, pool: &PoolHandle) -> Result<CapacityReport> {
        let args = vec!["pool".to_string(), "query".to_string(), pool.uuid.clone()];
        let response: PoolQueryResponse = run_json(&self.dmg_bin, &args).map_err(|err| match err {
            PxhError::PoolCommand { details, code, .. } => PxhError::PoolUnreachable {
                details: format!("pool {} query failed (exit {code}): {details}", pool.uuid),
            },
            other => other,
        })?;
        report_from_query(response)
    }

    fn create_container(&self, pool: &PoolHandle) -> Result<ContainerHandle> {
        let args = vec![
            "container".to_string(),
            "create".to_string(),
            pool.uuid.clone(),
            "--type=POSIX".to_string(),
        ];
        let created: ContainerCreateResponse = run_json(&self.daos_bin, &args)?;
        Ok(ContainerHandle::new(created.container_uuid))
    }

    fn list_containers(&self, pool: &PoolHandle) -> Result<Vec<ContainerHandle>> {
        let args = vec![
            "pool".to_string(),
            "list-containers".to_string(),
            pool.uuid.clone(),
        ];
        // An empty pool answers with `"response": null`.
        let raw = run_tool(&self.daos_bin, &prefixed_json(&args))?;
        let envelope: Envelope<Vec<ContainerEntry>> = serde_json::from_str(&raw)?;
        if envelope.status != 0 || envelope.error.is_some() {
            return Err(PxhError::PoolCommand {
                command: format!("{} {}", self.daos_bin, args.join(" ")),
                code: envelope.status,
                details: envelope.error.unwrap_or_default(),
            });
        }
        Ok(envelope
            .response
            .unwrap_or_default()
            .into_iter()
            .map(|entry| ContainerHandle::new(entry.uuid))
            .collect())
    }

    fn destroy_container(&self, pool: &PoolHandle, container: &ContainerHandle) -> Result<()> {
        let args = vec![
            "container".to_string(),
            "destroy".to_string(),
            pool.uuid.clone(),
            container.to_string(),
            "--force".to_string(),
        ];
        run_tool(&self.daos_bin, &args)
            .map(|_| ())
            .map_err(|err| PxhError::ContainerDestroy {
                container: container.to_string(),
                details: err.to_string(),
            })
    }
}

fn prefixed_json(args: &[String]) -> Vec<String> {
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push("-j".to_string());
    full.extend_from_slice(args);
    full
}

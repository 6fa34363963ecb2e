//! In-memory pool for tests and `pxh simulate`.
//!
//! One `SimulatedPool` plays every collaborator at once: pool service, write
//! workload, client log host and log locator. Space accounting is deliberately
//! simple:
//! - writes are refused once a tier's utilization would pass
//!   `write_ceiling_pct`; the refused write still lands the bytes that fit
//!   and appends a `DER_NOSPACE` line to the client log
//! - destroyed container space comes back only after `reclaim_lag_queries`
//!   further space queries, modeling asynchronous reclamation
//! - faults can be injected to make the pool misbehave in specific ways

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cluster::pool::{
    CapacityReport, ContainerHandle, PoolHandle, PoolService, PoolSize, TierUsage,
};
use crate::cluster::remote::{HostOutput, LogLocator, RemoteCommand, RemoteExecutor};
use crate::core::errors::{PxhError, Result};
use crate::core::tier::Tier;
use crate::load::workload::{Workload, WorkloadReport, WorkloadSpec};

const GIB: u64 = 1024 * 1024 * 1024;

/// Misbehaviors the simulated pool can be told to exhibit.
#[derive(Debug, Clone, PartialEq)]
pub enum SimFault {
    /// Ignore the write ceiling; writes succeed while raw space remains.
    AcceptOverfill,
    /// Keep this percentage of every destroyed container's bytes forever.
    LeakOnDestroy { pct: f64 },
    /// Every refused write also logs an unrelated error line.
    SpuriousLogError,
    /// Container destroy always fails.
    DestroyFails,
    /// Every pool query and creation fails.
    Unreachable,
}

/// Shape and behavior of the simulated pool.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub tiers: Vec<(Tier, u64)>,
    pub write_ceiling_pct: f64,
    /// Destroyed space is released on the Nth `query_space` call after the
    /// destroy. Every query counts, so space queries are not side-effect free
    /// here: a pre-teardown probe or the capacity lookup behind a fill also
    /// moves pending releases forward.
    pub reclaim_lag_queries: u32,
    /// Symmetric noise, in percent of tier capacity, added to reported free space.
    pub noise_pct: f64,
    pub seed: u64,
    /// The only host whose client log receives entries.
    pub client_host: String,
    pub log_dir: PathBuf,
    pub faults: Vec<SimFault>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tiers: vec![(Tier::Scm, 64 * GIB), (Tier::Nvme, 1024 * GIB)],
            write_ceiling_pct: 80.0,
            reclaim_lag_queries: 0,
            noise_pct: 0.0,
            seed: 0x5eed,
            client_host: "localhost".to_string(),
            log_dir: PathBuf::from("/sim/logs"),
            faults: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct PendingRelease {
    tier: Tier,
    bytes: u64,
    queries_left: u32,
}

#[derive(Debug)]
struct SimPoolState {
    handle: PoolHandle,
    totals: BTreeMap<Tier, u64>,
    containers: BTreeMap<ContainerHandle, BTreeMap<Tier, u64>>,
    pending: Vec<PendingRelease>,
    leaked: BTreeMap<Tier, u64>,
    properties: BTreeMap<String, String>,
}

impl SimPoolState {
    fn used(&self, tier: Tier) -> u64 {
        let live: u64 = self
            .containers
            .values()
            .filter_map(|per_tier| per_tier.get(&tier))
            .sum();
        let pending: u64 = self
            .pending
            .iter()
            .filter(|p| p.tier == tier)
            .map(|p| p.bytes)
            .sum();
        live + pending + self.leaked.get(&tier).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
struct SimState {
    pool: Option<SimPoolState>,
    next_id: u64,
    rng: StdRng,
    client_log: Vec<String>,
}

/// Simulated pool, workload, client host and log locator in one.
#[derive(Debug)]
pub struct SimulatedPool {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl SimulatedPool {
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            state: Mutex::new(SimState {
                pool: None,
                next_id: 1,
                rng,
                client_log: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Current value of a pool property, if the pool exists and it was set.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .pool
            .as_ref()
            .and_then(|pool| pool.properties.get(name).cloned())
    }

    /// Every line written to the client log so far.
    #[must_use]
    pub fn client_log(&self) -> Vec<String> {
        self.state.lock().client_log.clone()
    }

    /// Exact usage without noise and without advancing reclamation.
    #[must_use]
    pub fn snapshot(&self, tier: Tier) -> Option<TierUsage> {
        let state = self.state.lock();
        let pool = state.pool.as_ref()?;
        let total = *pool.totals.get(&tier)?;
        Some(TierUsage {
            total_bytes: total,
            free_bytes: total.saturating_sub(pool.used(tier)),
        })
    }

    fn has_fault(&self, probe: impl Fn(&SimFault) -> bool) -> bool {
        self.config.faults.iter().any(probe)
    }

    fn leak_pct(&self) -> f64 {
        self.config
            .faults
            .iter()
            .find_map(|fault| match fault {
                SimFault::LeakOnDestroy { pct } => Some(pct.clamp(0.0, 100.0)),
                _ => None,
            })
            .unwrap_or(0.0)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.has_fault(|f| matches!(f, SimFault::Unreachable)) {
            return Err(PxhError::PoolUnreachable {
                details: "simulated pool is unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn log_line(&self, message: &str) -> String {
        format!(
            "{} {} {message}",
            chrono::Utc::now().format("%m/%d-%H:%M:%S%.3f"),
            self.config.client_host
        )
    }
}

fn pool_mut<'a>(pool: &'a mut Option<SimPoolState>, handle: &PoolHandle) -> Result<&'a mut SimPoolState> {
    pool.as_mut()
        .filter(|p| p.handle.uuid == handle.uuid)
        .ok_or_else(|| PxhError::PoolUnreachable {
            details: format!("no simulated pool {}", handle.uuid),
        })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn pct_of(total: u64, pct: f64) -> u64 {
    ((total as f64) * pct / 100.0).floor() as u64
}

impl PoolService for SimulatedPool {
    fn create_pool(&self, size: PoolSize) -> Result<PoolHandle> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        let totals = self
            .config
            .tiers
            .iter()
            .map(|(tier, capacity)| {
                let total = match size {
                    PoolSize::Max => *capacity,
                    PoolSize::Bytes(bytes) => bytes.min(*capacity),
                };
                (*tier, total)
            })
            .collect();
        let handle = PoolHandle {
            uuid: format!("sim-pool-{id:08x}"),
            label: format!("pxh_sim_{id}"),
            svc_ranks: vec![0],
        };
        state.pool = Some(SimPoolState {
            handle: handle.clone(),
            totals,
            containers: BTreeMap::new(),
            pending: Vec::new(),
            leaked: BTreeMap::new(),
            properties: BTreeMap::new(),
        });
        Ok(handle)
    }

    fn set_property(&self, pool: &PoolHandle, name: &str, value: &str) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        let pool = pool_mut(&mut state.pool, pool)?;
        pool.properties.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn query_space(&self, pool: &PoolHandle) -> Result<CapacityReport> {
        self.check_reachable()?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let pool = pool_mut(&mut state.pool, pool)?;

        for release in &mut pool.pending {
            release.queries_left = release.queries_left.saturating_sub(1);
        }
        pool.pending.retain(|release| release.queries_left > 0);

        let noise_pct = self.config.noise_pct.abs();
        let mut tiers = Vec::with_capacity(pool.totals.len());
        for (tier, total) in &pool.totals {
            let mut free = total.saturating_sub(pool.used(*tier));
            if noise_pct > 0.0 {
                let jitter = state.rng.random_range(-noise_pct..=noise_pct);
                let delta = pct_of(*total, jitter.abs());
                free = if jitter >= 0.0 {
                    free.saturating_add(delta).min(*total)
                } else {
                    free.saturating_sub(delta)
                };
            }
            tiers.push((
                *tier,
                TierUsage {
                    total_bytes: *total,
                    free_bytes: free,
                },
            ));
        }
        Ok(CapacityReport::from_tiers(tiers))
    }

    fn create_container(&self, pool: &PoolHandle) -> Result<ContainerHandle> {
        self.check_reachable()?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let id = state.next_id;
        state.next_id += 1;
        let pool = pool_mut(&mut state.pool, pool)?;
        let container = ContainerHandle::new(format!("sim-cont-{id:04}"));
        pool.containers.insert(container.clone(), BTreeMap::new());
        Ok(container)
    }

    fn list_containers(&self, pool: &PoolHandle) -> Result<Vec<ContainerHandle>> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        let pool = pool_mut(&mut state.pool, pool)?;
        Ok(pool.containers.keys().cloned().collect())
    }

    fn destroy_container(&self, pool: &PoolHandle, container: &ContainerHandle) -> Result<()> {
        self.check_reachable()?;
        if self.has_fault(|f| matches!(f, SimFault::DestroyFails)) {
            return Err(PxhError::ContainerDestroy {
                container: container.to_string(),
                details: "DER_BUSY(-1012): simulated destroy failure".to_string(),
            });
        }
        let leak_pct = self.leak_pct();
        let lag = self.config.reclaim_lag_queries;

        let mut state = self.state.lock();
        let pool = pool_mut(&mut state.pool, pool)?;
        let Some(per_tier) = pool.containers.remove(container) else {
            return Err(PxhError::ContainerDestroy {
                container: container.to_string(),
                details: "DER_NONEXIST(-1005): no such container".to_string(),
            });
        };

        for (tier, bytes) in per_tier {
            let leaked = pct_of(bytes, leak_pct);
            if leaked > 0 {
                *pool.leaked.entry(tier).or_insert(0) += leaked;
            }
            let released = bytes - leaked;
            if lag > 0 && released > 0 {
                pool.pending.push(PendingRelease {
                    tier,
                    bytes: released,
                    queries_left: lag,
                });
            }
        }
        Ok(())
    }
}

impl Workload for SimulatedPool {
    fn run(&self, spec: &WorkloadSpec) -> Result<WorkloadReport> {
        self.check_reachable()?;
        let accept_overfill = self.has_fault(|f| matches!(f, SimFault::AcceptOverfill));
        let spurious = self.has_fault(|f| matches!(f, SimFault::SpuriousLogError));

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let pool = pool_mut(&mut state.pool, &spec.pool)?;

        let Some(total) = pool.totals.get(&spec.tier).copied() else {
            return Ok(WorkloadReport {
                exit_code: 1,
                output: format!("ior ERROR: pool has no {} tier", spec.tier),
            });
        };
        let ceiling = if accept_overfill {
            total
        } else {
            pct_of(total, self.config.write_ceiling_pct)
        };
        let available = ceiling.saturating_sub(pool.used(spec.tier));

        let Some(per_tier) = pool.containers.get_mut(&spec.container) else {
            return Ok(WorkloadReport {
                exit_code: 1,
                output: format!(
                    "ior ERROR: dfs_mount failed: DER_NONEXIST(-1005) for container {}",
                    spec.container
                ),
            });
        };

        if spec.bytes <= available {
            *per_tier.entry(spec.tier).or_insert(0) += spec.bytes;
            let line = self.log_line(&format!(
                "INFO src/client/dfs/dfs.c dfs_write() wrote {} bytes to {}",
                spec.bytes, spec.container
            ));
            state.client_log.push(line);
            return Ok(WorkloadReport {
                exit_code: 0,
                output: format!(
                    "Max Write: wrote {} bytes to {} on {}",
                    spec.bytes, spec.container, spec.tier
                ),
            });
        }

        *per_tier.entry(spec.tier).or_insert(0) += available;
        let line = self.log_line(
            "ERR  src/client/dfs/dfs.c dfs_write() Failed to write: DER_NOSPACE(-1007): 'No space available'",
        );
        state.client_log.push(line);
        if spurious {
            let line = self.log_line(
                "ERR  src/cart/crt_context.c crt_req_timeout_hdlr() rpc timed out: DER_TIMEDOUT(-1011)",
            );
            state.client_log.push(line);
        }
        Ok(WorkloadReport {
            exit_code: 1,
            output: format!(
                "ior ERROR: write failed after {available} of {} bytes: DER_NOSPACE(-1007): No space available",
                spec.bytes
            ),
        })
    }
}

impl RemoteExecutor for SimulatedPool {
    fn run(&self, hosts: &[String], command: &RemoteCommand) -> Result<Vec<HostOutput>> {
        let log = self.client_log();
        let outputs = hosts
            .iter()
            .map(|host| {
                let (pattern, path) = match (command.program.as_str(), command.args.as_slice()) {
                    ("grep", [dashes, pattern, path]) if dashes == "--" => (pattern, path),
                    _ => {
                        return HostOutput {
                            host: host.clone(),
                            exit_code: 127,
                            stdout: String::new(),
                            stderr: format!("{}: command not found", command.program),
                        };
                    }
                };
                let searchable =
                    *host == self.config.client_host && Path::new(path).starts_with(&self.config.log_dir);
                let matched: Vec<&str> = if searchable {
                    log.iter()
                        .map(String::as_str)
                        .filter(|line| line.contains(pattern.as_str()))
                        .collect()
                } else {
                    Vec::new()
                };
                let stdout = if matched.is_empty() {
                    String::new()
                } else {
                    format!("{}\n", matched.join("\n"))
                };
                HostOutput {
                    host: host.clone(),
                    exit_code: i32::from(matched.is_empty()),
                    stdout,
                    stderr: String::new(),
                }
            })
            .collect();
        Ok(outputs)
    }
}

impl LogLocator for SimulatedPool {
    fn resolve(&self, name: &str) -> PathBuf {
        self.config.log_dir.join(name)
    }
}

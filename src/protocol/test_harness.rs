//! Collaborator doubles for driving trials into their failure branches.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::classify::log_classifier::LogClassifier;
use crate::cluster::pool::{
    CapacityReport, ContainerHandle, PoolHandle, PoolService, PoolSize, TierUsage,
};
use crate::cluster::remote::LogLocator;
use crate::cluster::sim::{SimConfig, SimulatedPool};
use crate::core::config::{Config, ReclaimStrategy};
use crate::core::errors::Result;
use crate::core::tier::Tier;
use crate::load::driver::LoadDriver;
use crate::load::workload::{Workload, WorkloadReport, WorkloadSpec};
use crate::logger::activity::ActivityLoggerHandle;
use crate::monitor::capacity::CapacityProbe;
use crate::protocol::reclaim::ReclaimWaiter;
use crate::protocol::trial::{TrialContext, TrialSettings};

pub const SCM_BYTES: u64 = 1_000_000;

pub fn sim() -> Arc<SimulatedPool> {
    Arc::new(SimulatedPool::new(SimConfig {
        tiers: vec![(Tier::Scm, SCM_BYTES)],
        ..SimConfig::default()
    }))
}

/// Non-capacity workload failure, as IOR reports a permissions error.
pub fn permission_denied() -> WorkloadReport {
    WorkloadReport {
        exit_code: 2,
        output: "ior ERROR: open failed: DER_NO_PERM(-1001)\n".to_string(),
    }
}

/// Replays scripted reports in call order; `None` entries and calls past the
/// end of the script go to the simulated pool.
pub struct ScriptedWorkload {
    inner: Arc<SimulatedPool>,
    script: Mutex<VecDeque<Option<WorkloadReport>>>,
}

impl ScriptedWorkload {
    pub fn new(inner: &Arc<SimulatedPool>, script: Vec<Option<WorkloadReport>>) -> Self {
        Self {
            inner: inner.clone(),
            script: Mutex::new(script.into()),
        }
    }
}

impl Workload for ScriptedWorkload {
    fn run(&self, spec: &WorkloadSpec) -> Result<WorkloadReport> {
        let next = self.script.lock().pop_front().flatten();
        match next {
            Some(report) => Ok(report),
            None => self.inner.run(spec),
        }
    }
}

/// Pool service over the simulator that can misreport teardown.
pub struct RiggedPool {
    inner: Arc<SimulatedPool>,
    /// The first destroy call reports success but leaves the container.
    keep_first: AtomicBool,
    /// Free percentage reported before and after the first destroy.
    reported_free_pct: Option<(f64, f64)>,
    destroyed: AtomicBool,
}

impl RiggedPool {
    pub fn keeping_one_container(inner: &Arc<SimulatedPool>) -> Self {
        Self {
            inner: inner.clone(),
            keep_first: AtomicBool::new(true),
            reported_free_pct: None,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn reporting_free(inner: &Arc<SimulatedPool>, before: f64, after: f64) -> Self {
        Self {
            inner: inner.clone(),
            keep_first: AtomicBool::new(false),
            reported_free_pct: Some((before, after)),
            destroyed: AtomicBool::new(false),
        }
    }
}

impl PoolService for RiggedPool {
    fn create_pool(&self, size: PoolSize) -> Result<PoolHandle> {
        self.inner.create_pool(size)
    }

    fn set_property(&self, pool: &PoolHandle, name: &str, value: &str) -> Result<()> {
        self.inner.set_property(pool, name, value)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn query_space(&self, pool: &PoolHandle) -> Result<CapacityReport> {
        let report = self.inner.query_space(pool)?;
        let Some((before, after)) = self.reported_free_pct else {
            return Ok(report);
        };
        let pct = if self.destroyed.load(Ordering::SeqCst) {
            after
        } else {
            before
        };
        Ok(CapacityReport::from_tiers(report.iter().map(|(tier, usage)| {
            (
                tier,
                TierUsage {
                    total_bytes: usage.total_bytes,
                    free_bytes: (usage.total_bytes as f64 * pct / 100.0) as u64,
                },
            )
        })))
    }

    fn create_container(&self, pool: &PoolHandle) -> Result<ContainerHandle> {
        self.inner.create_container(pool)
    }

    fn list_containers(&self, pool: &PoolHandle) -> Result<Vec<ContainerHandle>> {
        self.inner.list_containers(pool)
    }

    fn destroy_container(&self, pool: &PoolHandle, container: &ContainerHandle) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        if self.keep_first.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.destroy_container(pool, container)
    }
}

/// Trial context over `service` and `workload`, with a zero-length fixed
/// reclaim wait and log collection from the simulator.
pub fn context(
    sim: &Arc<SimulatedPool>,
    service: Arc<dyn PoolService>,
    workload: Arc<dyn Workload>,
) -> TrialContext {
    let pool = service.create_pool(PoolSize::Max).expect("create simulated pool");
    let mut config = Config::default();
    config.reclaim.strategy = ReclaimStrategy::Fixed;
    config.reclaim.settle_secs = 0;

    let probe = CapacityProbe::new(service.clone(), pool);
    TrialContext {
        service: service.clone(),
        probe: probe.clone(),
        driver: LoadDriver::new(service, workload, probe, &config.workload)
            .expect("default workload config"),
        classifier: LogClassifier::new(sim.clone(), &config.logs),
        waiter: ReclaimWaiter::from_config(&config.reclaim),
        settings: TrialSettings {
            tier: Tier::Scm,
            nominal_pct: 75.0,
            overfill_pct: 10.0,
            hosts: vec!["localhost".to_string()],
            log_path: sim.resolve("daos_client.log"),
        },
        activity: ActivityLoggerHandle::detached(),
    }
}

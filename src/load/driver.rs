//! Load driver: percentage-sized fills with a typed three-way outcome.
//!
//! A fill either completes, is refused because the tier ran out of space, or
//! fails some other way. Infrastructure problems (workload cannot start,
//! container cannot be created, pool unreachable) are `Err` and never reach
//! the outcome at all, so callers can match the three domain cases
//! exhaustively without inspecting error text.

#![allow(missing_docs)]

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use crate::cluster::pool::{ContainerHandle, PoolService};
use crate::core::config::WorkloadConfig;
use crate::core::errors::{PxhError, Result};
use crate::core::tier::Tier;
use crate::load::workload::{Workload, WorkloadSpec};
use crate::monitor::capacity::CapacityProbe;

/// Result of one fill request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FillOutcome {
    Completed {
        container: ContainerHandle,
        bytes: u64,
    },
    /// The pool refused the write for lack of space on the tier.
    CapacityExceeded {
        container: ContainerHandle,
        bytes: u64,
        detail: String,
    },
    /// The workload failed for a reason other than capacity.
    Failed {
        container: ContainerHandle,
        bytes: u64,
        exit_code: i32,
        detail: String,
    },
}

impl FillOutcome {
    #[must_use]
    pub const fn container(&self) -> &ContainerHandle {
        match self {
            Self::Completed { container, .. }
            | Self::CapacityExceeded { container, .. }
            | Self::Failed { container, .. } => container,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Issues writes sized as a percentage of a tier's capacity.
pub struct LoadDriver {
    service: Arc<dyn PoolService>,
    workload: Arc<dyn Workload>,
    probe: CapacityProbe,
    capacity_exceeded: Regex,
    scm_transfer_bytes: u64,
    nvme_transfer_bytes: u64,
}

impl LoadDriver {
    pub fn new(
        service: Arc<dyn PoolService>,
        workload: Arc<dyn Workload>,
        probe: CapacityProbe,
        config: &WorkloadConfig,
    ) -> Result<Self> {
        Ok(Self {
            service,
            workload,
            probe,
            capacity_exceeded: Regex::new(&config.capacity_exceeded_pattern)?,
            scm_transfer_bytes: config.scm_transfer_bytes,
            nvme_transfer_bytes: config.nvme_transfer_bytes,
        })
    }

    /// Bytes a fill of `target_percent` would write, from the tier's capacity now.
    pub fn bytes_for(&self, tier: Tier, target_percent: f64) -> Result<u64> {
        validate_percent(target_percent)?;
        let usage = self.probe.tier_usage(tier)?;
        Ok(scaled(usage.total_bytes, target_percent))
    }

    /// Write roughly `target_percent` of `tier` into a fresh container.
    pub fn fill(&self, tier: Tier, target_percent: f64) -> Result<FillOutcome> {
        let bytes = self.bytes_for(tier, target_percent)?;
        let container = self.service.create_container(self.probe.pool())?;
        let spec = WorkloadSpec {
            pool: self.probe.pool().clone(),
            container: container.clone(),
            tier,
            bytes,
            transfer_bytes: self.transfer_bytes(tier),
        };
        let report = self.workload.run(&spec)?;

        if report.succeeded() {
            return Ok(FillOutcome::Completed { container, bytes });
        }
        let detail = summarize(&report.output);
        if self.capacity_exceeded.is_match(&report.output) {
            Ok(FillOutcome::CapacityExceeded {
                container,
                bytes,
                detail,
            })
        } else {
            Ok(FillOutcome::Failed {
                container,
                bytes,
                exit_code: report.exit_code,
                detail,
            })
        }
    }

    const fn transfer_bytes(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Scm => self.scm_transfer_bytes,
            Tier::Nvme => self.nvme_transfer_bytes,
        }
    }
}

fn validate_percent(target_percent: f64) -> Result<()> {
    if target_percent > 0.0 && target_percent <= 100.0 {
        Ok(())
    } else {
        Err(PxhError::InvalidArgument {
            details: format!("fill percentage must be in (0, 100], got {target_percent}"),
        })
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn scaled(total_bytes: u64, pct: f64) -> u64 {
    ((total_bytes as f64) * pct / 100.0).floor() as u64
}

/// Last non-empty output line, which is where IOR reports the failing call.
fn summarize(output: &str) -> String {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no output")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::pool::{PoolHandle, PoolSize};
    use crate::cluster::sim::{SimConfig, SimFault, SimulatedPool};
    use crate::load::workload::WorkloadReport;

    fn driver_over(sim: &Arc<SimulatedPool>, pool: PoolHandle) -> LoadDriver {
        let probe = CapacityProbe::new(sim.clone(), pool);
        LoadDriver::new(sim.clone(), sim.clone(), probe, &WorkloadConfig::default()).unwrap()
    }

    fn fixture(faults: Vec<SimFault>) -> (Arc<SimulatedPool>, PoolHandle) {
        let sim = Arc::new(SimulatedPool::new(SimConfig {
            tiers: vec![(Tier::Scm, 1_000_000), (Tier::Nvme, 10_000_000)],
            faults,
            ..SimConfig::default()
        }));
        let pool = sim.create_pool(PoolSize::Max).unwrap();
        (sim, pool)
    }

    #[test]
    fn nominal_then_overfill_yields_completed_then_exceeded() {
        let (sim, pool) = fixture(Vec::new());
        let driver = driver_over(&sim, pool);

        match driver.fill(Tier::Scm, 75.0).unwrap() {
            FillOutcome::Completed { bytes, .. } => assert_eq!(bytes, 750_000),
            other => panic!("unexpected outcome: {other:?}"),
        }
        match driver.fill(Tier::Scm, 10.0).unwrap() {
            FillOutcome::CapacityExceeded { detail, .. } => {
                assert!(detail.contains("DER_NOSPACE"), "{detail}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn accepted_overfill_surfaces_as_completed() {
        let (sim, pool) = fixture(vec![SimFault::AcceptOverfill]);
        let driver = driver_over(&sim, pool);
        assert!(matches!(
            driver.fill(Tier::Scm, 75.0).unwrap(),
            FillOutcome::Completed { .. }
        ));
        assert!(matches!(
            driver.fill(Tier::Scm, 10.0).unwrap(),
            FillOutcome::Completed { .. }
        ));
    }

    #[test]
    fn out_of_range_percent_is_invalid_argument() {
        let (sim, pool) = fixture(Vec::new());
        let driver = driver_over(&sim, pool);
        for pct in [0.0, -5.0, 100.5, f64::NAN] {
            let err = driver.fill(Tier::Scm, pct).unwrap_err();
            assert_eq!(err.code(), "PXH-1101", "pct {pct}");
        }
        assert!(driver.fill(Tier::Nvme, 100.0).is_ok());
    }

    struct FailingWorkload(WorkloadReport);

    impl Workload for FailingWorkload {
        fn run(&self, _spec: &WorkloadSpec) -> Result<WorkloadReport> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn non_capacity_failure_is_distinguished() {
        let (sim, pool) = fixture(Vec::new());
        let probe = CapacityProbe::new(sim.clone(), pool);
        let workload = Arc::new(FailingWorkload(WorkloadReport {
            exit_code: 2,
            output: "ior ERROR: open failed: DER_NO_PERM(-1001)\n".to_string(),
        }));
        let driver =
            LoadDriver::new(sim.clone(), workload, probe, &WorkloadConfig::default()).unwrap();
        match driver.fill(Tier::Scm, 5.0).unwrap() {
            FillOutcome::Failed {
                exit_code, detail, ..
            } => {
                assert_eq!(exit_code, 2);
                assert!(detail.contains("DER_NO_PERM"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn enospc_text_counts_as_capacity_exceeded() {
        let (sim, pool) = fixture(Vec::new());
        let probe = CapacityProbe::new(sim.clone(), pool);
        let workload = Arc::new(FailingWorkload(WorkloadReport {
            exit_code: 1,
            output: "write(): No space left on device\n".to_string(),
        }));
        let driver =
            LoadDriver::new(sim.clone(), workload, probe, &WorkloadConfig::default()).unwrap();
        let outcome = driver.fill(Tier::Scm, 5.0).unwrap();
        assert_eq!(outcome.label(), "capacity_exceeded");
    }

    #[test]
    fn every_fill_owns_a_new_container() {
        let (sim, pool) = fixture(Vec::new());
        let driver = driver_over(&sim, pool.clone());
        let a = driver.fill(Tier::Scm, 10.0).unwrap();
        let b = driver.fill(Tier::Scm, 10.0).unwrap();
        assert_ne!(a.container(), b.container());
        assert_eq!(sim.list_containers(&pool).unwrap().len(), 2);
    }
}

//! Waiting for asynchronous reclamation after teardown.

#![allow(missing_docs)]

use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::{ReclaimConfig, ReclaimStrategy};
use crate::core::errors::Result;
use crate::core::tier::Tier;
use crate::monitor::capacity::CapacityProbe;

/// Last free-space reading taken after teardown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReclaimMeasurement {
    pub free_pct: f64,
    pub probes: u32,
    #[serde(rename = "waited_ms", serialize_with = "millis")]
    pub waited: Duration,
}

#[allow(clippy::cast_possible_truncation)]
fn millis<S: serde::Serializer>(value: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(value.as_millis() as u64)
}

/// Blocks until the tier has had its chance to reclaim, then reports free space.
///
/// The waiter only measures; whether the reading is good enough is the
/// caller's decision, so both strategies share one pass/fail threshold.
#[derive(Debug, Clone)]
pub struct ReclaimWaiter {
    strategy: ReclaimStrategy,
    settle: Duration,
    interval: Duration,
    threshold_pct: f64,
}

impl ReclaimWaiter {
    #[must_use]
    pub fn from_config(config: &ReclaimConfig) -> Self {
        Self {
            strategy: config.strategy,
            settle: Duration::from_secs(config.settle_secs),
            interval: Duration::from_millis(config.poll_interval_ms),
            threshold_pct: config.high_water_free_pct,
        }
    }

    #[must_use]
    pub const fn threshold_pct(&self) -> f64 {
        self.threshold_pct
    }

    pub fn wait(&self, probe: &CapacityProbe, tier: Tier) -> Result<ReclaimMeasurement> {
        match self.strategy {
            ReclaimStrategy::Fixed => {
                let start = Instant::now();
                thread::sleep(self.settle);
                Ok(ReclaimMeasurement {
                    free_pct: probe.free_pct(tier)?,
                    probes: 1,
                    waited: start.elapsed(),
                })
            }
            ReclaimStrategy::Poll => self.poll(probe, tier),
        }
    }

    fn poll(&self, probe: &CapacityProbe, tier: Tier) -> Result<ReclaimMeasurement> {
        let start = Instant::now();
        let deadline = start + self.settle;
        let mut probes = 0;
        loop {
            let free_pct = probe.free_pct(tier)?;
            probes += 1;
            let now = Instant::now();
            if free_pct >= self.threshold_pct || now >= deadline {
                return Ok(ReclaimMeasurement {
                    free_pct,
                    probes,
                    waited: now - start,
                });
            }
            thread::sleep(self.interval.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cluster::pool::{PoolService, PoolSize};
    use crate::cluster::sim::{SimConfig, SimFault, SimulatedPool};
    use crate::load::workload::{Workload, WorkloadSpec};

    fn drained_pool(lag: u32, faults: Vec<SimFault>) -> CapacityProbe {
        let sim = Arc::new(SimulatedPool::new(SimConfig {
            tiers: vec![(Tier::Scm, 1_000)],
            reclaim_lag_queries: lag,
            faults,
            ..SimConfig::default()
        }));
        let pool = sim.create_pool(PoolSize::Max).unwrap();
        let container = sim.create_container(&pool).unwrap();
        Workload::run(
            sim.as_ref(),
            &WorkloadSpec {
                pool: pool.clone(),
                container: container.clone(),
                tier: Tier::Scm,
                bytes: 700,
                transfer_bytes: 1,
            },
        )
        .unwrap();
        sim.destroy_container(&pool, &container).unwrap();
        CapacityProbe::new(sim, pool)
    }

    fn waiter(strategy: ReclaimStrategy, settle_secs: u64) -> ReclaimWaiter {
        ReclaimWaiter::from_config(&ReclaimConfig {
            strategy,
            high_water_free_pct: 95.0,
            settle_secs,
            poll_interval_ms: 1,
        })
    }

    #[test]
    fn fixed_zero_wait_sees_lagging_reclaim() {
        let probe = drained_pool(3, Vec::new());
        let m = waiter(ReclaimStrategy::Fixed, 0)
            .wait(&probe, Tier::Scm)
            .unwrap();
        assert_eq!(m.probes, 1);
        assert!((m.free_pct - 30.0).abs() < 1e-9, "{}", m.free_pct);
    }

    #[test]
    fn poll_waits_out_the_lag() {
        let probe = drained_pool(3, Vec::new());
        let m = waiter(ReclaimStrategy::Poll, 5)
            .wait(&probe, Tier::Scm)
            .unwrap();
        assert_eq!(m.probes, 3);
        assert!((m.free_pct - 100.0).abs() < 1e-9);
    }

    #[test]
    fn poll_gives_up_at_deadline_with_last_reading() {
        let probe = drained_pool(0, vec![SimFault::LeakOnDestroy { pct: 10.0 }]);
        let m = waiter(ReclaimStrategy::Poll, 0)
            .wait(&probe, Tier::Scm)
            .unwrap();
        assert_eq!(m.probes, 1);
        assert!((m.free_pct - 93.0).abs() < 1e-9, "{}", m.free_pct);
    }
}

//! End-to-end exhaustion run: pool setup, then the trial sequence.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::classify::log_classifier::LogClassifier;
use crate::cluster::dmg::DmgPoolService;
use crate::cluster::pool::{CapacityReport, PoolHandle, PoolService, PoolSize};
use crate::cluster::remote::{DirLogLocator, LogLocator, RemoteExecutor, SshExecutor};
use crate::cluster::sim::SimulatedPool;
use crate::core::config::Config;
use crate::core::errors::{PxhError, Result};
use crate::load::driver::LoadDriver;
use crate::load::workload::{IorWorkload, Workload};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::monitor::capacity::CapacityProbe;
use crate::protocol::reclaim::ReclaimWaiter;
use crate::protocol::sequencer::{SequenceFailure, SequenceReport, TrialSequencer};
use crate::protocol::trial::{TrialContext, TrialSettings};

/// The black boxes a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub pool: Arc<dyn PoolService>,
    pub workload: Arc<dyn Workload>,
    pub remote: Arc<dyn RemoteExecutor>,
    pub logs: Arc<dyn LogLocator>,
}

impl Collaborators {
    /// Production adapters: `dmg`/`daos`, `ior`, `ssh`, and the configured log directory.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            pool: Arc::new(DmgPoolService::new(&config.pool)),
            workload: Arc::new(IorWorkload::new(&config.workload)),
            remote: Arc::new(SshExecutor::new(&config.remote)),
            logs: Arc::new(DirLogLocator::from_config(&config.logs)),
        }
    }

    /// One simulated pool playing every role.
    #[must_use]
    pub fn simulated(sim: &Arc<SimulatedPool>) -> Self {
        Self {
            pool: sim.clone(),
            workload: sim.clone(),
            remote: sim.clone(),
            logs: sim.clone(),
        }
    }
}

/// Which pool a run exercises.
#[derive(Debug, Clone)]
pub enum PoolTarget {
    Create(PoolSize),
    Existing(PoolHandle),
}

impl PoolTarget {
    #[must_use]
    pub fn from_config(config: &Config, existing: Option<&str>) -> Self {
        existing.map_or_else(
            || Self::Create(PoolSize::from_config(config.pool.size_bytes)),
            |uuid| Self::Existing(PoolHandle::existing(uuid)),
        )
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Passed(SequenceReport),
    Failed(SequenceFailure),
}

/// Result of a run whose setup succeeded.
#[derive(Debug)]
pub struct RunSummary {
    pub pool: PoolHandle,
    pub initial: CapacityReport,
    pub config_hash: String,
    pub outcome: RunOutcome,
}

impl RunSummary {
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Passed(_))
    }

    /// Collapse into the sequence report, surfacing a failure as its error.
    pub fn into_result(self) -> Result<SequenceReport> {
        match self.outcome {
            RunOutcome::Passed(report) => Ok(report),
            RunOutcome::Failed(failure) => Err(failure.error),
        }
    }

    /// Machine-readable view for `--json` output.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct Failure<'a> {
            trial: Option<u32>,
            phase: Option<String>,
            code: &'static str,
            category: String,
            message: String,
            ledger: &'a crate::protocol::trial::RunLedger,
        }

        let outcome = match &self.outcome {
            RunOutcome::Passed(report) => serde_json::to_value(report),
            RunOutcome::Failed(failure) => serde_json::to_value(Failure {
                trial: failure.trial.map(|index| index + 1),
                phase: failure.phase.map(|phase| format!("{phase:?}")),
                code: failure.error.code(),
                category: format!("{:?}", failure.error.category()),
                message: failure.error.to_string(),
                ledger: &failure.ledger,
            }),
        }
        .unwrap_or(serde_json::Value::Null);

        serde_json::json!({
            "passed": self.passed(),
            "pool": self.pool,
            "initial_capacity": self.initial,
            "config_hash": self.config_hash,
            "result": outcome,
        })
    }
}

/// Sets up a pool for exhaustion testing and runs the trial sequence on it.
pub struct ExhaustionScenario<'a> {
    config: &'a Config,
    collaborators: Collaborators,
    activity: ActivityLoggerHandle,
}

impl<'a> ExhaustionScenario<'a> {
    #[must_use]
    pub fn new(
        config: &'a Config,
        collaborators: Collaborators,
        activity: ActivityLoggerHandle,
    ) -> Self {
        Self {
            config,
            collaborators,
            activity,
        }
    }

    /// Setup failures are `Err`; anything after setup lands in the summary.
    pub fn run(&self, target: PoolTarget) -> Result<RunSummary> {
        let started = Instant::now();
        let config = self.config;
        let tier = config.trial.tier;

        let setup = self.setup(target);
        let (pool, initial) = match setup {
            Ok(ready) => ready,
            Err(error) => {
                self.activity.send(ActivityEvent::Failure {
                    trial: None,
                    code: error.code().to_string(),
                    message: error.to_string(),
                });
                return Err(error);
            }
        };
        let config_hash = config.stable_hash()?;

        self.activity.send(ActivityEvent::RunStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: config_hash.clone(),
            pool: pool.uuid.clone(),
            tier,
            iterations: config.trial.iterations,
        });
        if let Some(free_pct) = initial.free_pct(tier) {
            self.activity.send(ActivityEvent::CapacitySampled {
                trial: 0,
                tier,
                free_pct,
                stage: "initial",
            });
        }

        let ctx = self.trial_context(&pool)?;
        let sequencer =
            TrialSequencer::new(&ctx, config.trial.iterations, config.trial.final_fill_pct);
        let outcome = match sequencer.run() {
            Ok(report) => RunOutcome::Passed(report),
            Err(failure) => RunOutcome::Failed(failure),
        };

        let (trials, expected_signals) = match &outcome {
            RunOutcome::Passed(report) => (
                report.ledger.completed_trials,
                report.ledger.expected_signals,
            ),
            RunOutcome::Failed(failure) => (
                failure.ledger.completed_trials,
                failure.ledger.expected_signals,
            ),
        };
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = started.elapsed().as_millis() as u64;
        self.activity.send(ActivityEvent::RunFinished {
            trials,
            expected_signals,
            ok: matches!(outcome, RunOutcome::Passed(_)),
            duration_ms,
        });

        Ok(RunSummary {
            pool,
            initial,
            config_hash,
            outcome,
        })
    }

    /// Create or adopt the pool, record its capacity, and disable background
    /// reclamation so space accounting only moves when the harness acts.
    fn setup(&self, target: PoolTarget) -> Result<(PoolHandle, CapacityReport)> {
        let service = &self.collaborators.pool;
        let pool = match target {
            PoolTarget::Create(size) => service.create_pool(size)?,
            PoolTarget::Existing(handle) => handle,
        };
        let initial = service.query_space(&pool)?;
        if initial.usage(self.config.trial.tier).is_none() {
            return Err(PxhError::PoolUnreachable {
                details: format!(
                    "pool {} has no {} tier to exhaust",
                    pool.uuid, self.config.trial.tier
                ),
            });
        }
        service.set_property(
            &pool,
            &self.config.pool.reclaim_property,
            &self.config.pool.reclaim_disabled_value,
        )?;
        Ok((pool, initial))
    }

    fn trial_context(&self, pool: &PoolHandle) -> Result<TrialContext> {
        let config = self.config;
        let c = &self.collaborators;
        let probe = CapacityProbe::new(c.pool.clone(), pool.clone());
        Ok(TrialContext {
            service: c.pool.clone(),
            probe: probe.clone(),
            driver: LoadDriver::new(c.pool.clone(), c.workload.clone(), probe, &config.workload)?,
            classifier: LogClassifier::new(c.remote.clone(), &config.logs),
            waiter: ReclaimWaiter::from_config(&config.reclaim),
            settings: TrialSettings {
                tier: config.trial.tier,
                nominal_pct: config.trial.nominal_fill_pct,
                overfill_pct: config.trial.overfill_pct,
                hosts: config.logs.client_hosts.clone(),
                log_path: c.logs.resolve(&config.logs.client_log),
            },
            activity: self.activity.clone(),
        })
    }
}

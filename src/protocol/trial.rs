//! One fill/overfill/verify/teardown/reclaim iteration.
//!
//! The trial is an explicit state machine. Each state either advances or
//! returns an error; there is no retry and no way back to an earlier state.
//! Cross-trial state lives only in the [`RunLedger`] handed in and returned.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::classify::log_classifier::{ErrorTally, LogClassifier};
use crate::cluster::pool::PoolService;
use crate::core::errors::{ContractViolation, Result};
use crate::core::tier::Tier;
use crate::load::driver::{FillOutcome, LoadDriver};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::monitor::capacity::CapacityProbe;
use crate::protocol::reclaim::{ReclaimMeasurement, ReclaimWaiter};

/// What the run has established so far.
///
/// After trial `i` (0-based) passes, `completed_trials == i + 1` and, since
/// every trial provokes exactly one refused write, `expected_signals == i + 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunLedger {
    pub completed_trials: u32,
    pub expected_signals: u64,
}

impl RunLedger {
    #[must_use]
    pub const fn advanced(self) -> Self {
        Self {
            completed_trials: self.completed_trials + 1,
            expected_signals: self.expected_signals + 1,
        }
    }
}

/// Fixed inputs shared by every trial of a run.
#[derive(Debug, Clone)]
pub struct TrialSettings {
    pub tier: Tier,
    pub nominal_pct: f64,
    pub overfill_pct: f64,
    pub hosts: Vec<String>,
    pub log_path: PathBuf,
}

/// Collaborators a trial drives.
pub struct TrialContext {
    pub service: Arc<dyn PoolService>,
    pub probe: CapacityProbe,
    pub driver: LoadDriver,
    pub classifier: LogClassifier,
    pub waiter: ReclaimWaiter,
    pub settings: TrialSettings,
    pub activity: ActivityLoggerHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialPhase {
    FillNominal,
    AttemptOverfill,
    VerifyLogs,
    Teardown,
    VerifyReclaim,
    Done,
}

#[derive(Debug)]
struct Fills {
    nominal: FillOutcome,
    overfill: FillOutcome,
}

#[derive(Debug)]
enum TrialState {
    FillNominal,
    AttemptOverfill {
        nominal: FillOutcome,
    },
    VerifyLogs {
        fills: Fills,
    },
    Teardown {
        fills: Fills,
        tally: ErrorTally,
    },
    VerifyReclaim {
        fills: Fills,
        tally: ErrorTally,
        baseline_free_pct: f64,
        destroyed: usize,
    },
    Done(Box<TrialReport>),
}

impl TrialState {
    const fn phase(&self) -> TrialPhase {
        match self {
            Self::FillNominal => TrialPhase::FillNominal,
            Self::AttemptOverfill { .. } => TrialPhase::AttemptOverfill,
            Self::VerifyLogs { .. } => TrialPhase::VerifyLogs,
            Self::Teardown { .. } => TrialPhase::Teardown,
            Self::VerifyReclaim { .. } => TrialPhase::VerifyReclaim,
            Self::Done(_) => TrialPhase::Done,
        }
    }
}

/// Outcome of a passed trial.
#[derive(Debug, Clone, Serialize)]
pub struct TrialReport {
    pub index: u32,
    pub ledger: RunLedger,
    pub nominal: FillOutcome,
    pub overfill: FillOutcome,
    pub tally: ErrorTally,
    pub destroyed: usize,
    pub baseline_free_pct: f64,
    pub reclaim: ReclaimMeasurement,
    #[serde(rename = "duration_ms", serialize_with = "millis")]
    pub duration: Duration,
}

#[allow(clippy::cast_possible_truncation)]
fn millis<S: serde::Serializer>(value: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(value.as_millis() as u64)
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// A single trial, numbered from 0.
pub struct ExhaustionTrial<'a> {
    index: u32,
    ctx: &'a TrialContext,
    phase: TrialPhase,
}

impl<'a> ExhaustionTrial<'a> {
    #[must_use]
    pub const fn new(index: u32, ctx: &'a TrialContext) -> Self {
        Self {
            index,
            ctx,
            phase: TrialPhase::FillNominal,
        }
    }

    /// Phase reached so far; after a failed `run` this is where it stopped.
    #[must_use]
    pub const fn phase(&self) -> TrialPhase {
        self.phase
    }

    /// Drive every phase in order and return the advanced ledger on success.
    pub fn run(&mut self, ledger: RunLedger) -> Result<TrialReport> {
        let started = Instant::now();
        let mut state = TrialState::FillNominal;
        loop {
            self.phase = state.phase();
            state = match state {
                TrialState::FillNominal => TrialState::AttemptOverfill {
                    nominal: self.fill_nominal()?,
                },
                TrialState::AttemptOverfill { nominal } => TrialState::VerifyLogs {
                    fills: Fills {
                        nominal,
                        overfill: self.attempt_overfill()?,
                    },
                },
                TrialState::VerifyLogs { fills } => TrialState::Teardown {
                    tally: self.verify_logs(ledger)?,
                    fills,
                },
                TrialState::Teardown { fills, tally } => {
                    let (baseline_free_pct, destroyed) = self.teardown()?;
                    TrialState::VerifyReclaim {
                        fills,
                        tally,
                        baseline_free_pct,
                        destroyed,
                    }
                }
                TrialState::VerifyReclaim {
                    fills,
                    tally,
                    baseline_free_pct,
                    destroyed,
                } => {
                    let reclaim = self.verify_reclaim(baseline_free_pct)?;
                    TrialState::Done(Box::new(TrialReport {
                        index: self.index,
                        ledger: ledger.advanced(),
                        nominal: fills.nominal,
                        overfill: fills.overfill,
                        tally,
                        destroyed,
                        baseline_free_pct,
                        reclaim,
                        duration: started.elapsed(),
                    }))
                }
                TrialState::Done(report) => {
                    self.ctx.activity.send(ActivityEvent::TrialPassed {
                        trial: self.number(),
                        duration_ms: elapsed_ms(started),
                    });
                    return Ok(*report);
                }
            };
        }
    }

    /// 1-based trial number used in logs.
    const fn number(&self) -> u32 {
        self.index + 1
    }

    fn fill(&self, pct: f64) -> Result<FillOutcome> {
        let tier = self.ctx.settings.tier;
        let started = Instant::now();
        let outcome = self.ctx.driver.fill(tier, pct)?;
        let (bytes, detail) = match &outcome {
            FillOutcome::Completed { bytes, .. } => (*bytes, None),
            FillOutcome::CapacityExceeded { bytes, detail, .. }
            | FillOutcome::Failed { bytes, detail, .. } => (*bytes, Some(detail.clone())),
        };
        self.ctx.activity.send(ActivityEvent::FillFinished {
            trial: self.number(),
            tier,
            pct,
            container: outcome.container().to_string(),
            bytes,
            outcome: outcome.label(),
            duration_ms: elapsed_ms(started),
            detail,
        });
        Ok(outcome)
    }

    fn fill_nominal(&self) -> Result<FillOutcome> {
        let settings = &self.ctx.settings;
        let outcome = self.fill(settings.nominal_pct)?;
        match &outcome {
            FillOutcome::Completed { .. } => Ok(outcome),
            FillOutcome::CapacityExceeded { detail, .. } | FillOutcome::Failed { detail, .. } => {
                Err(ContractViolation::NominalFillFailed {
                    tier: settings.tier,
                    pct: settings.nominal_pct,
                    detail: detail.clone(),
                }
                .into())
            }
        }
    }

    fn attempt_overfill(&self) -> Result<FillOutcome> {
        let settings = &self.ctx.settings;
        let outcome = self.fill(settings.overfill_pct)?;
        match &outcome {
            FillOutcome::CapacityExceeded { .. } => Ok(outcome),
            FillOutcome::Completed { .. } => Err(ContractViolation::OverfillAccepted {
                tier: settings.tier,
                pct: settings.overfill_pct,
            }
            .into()),
            FillOutcome::Failed { detail, .. } => {
                Err(ContractViolation::OverfillFailedUnexpectedly {
                    tier: settings.tier,
                    pct: settings.overfill_pct,
                    detail: detail.clone(),
                }
                .into())
            }
        }
    }

    fn verify_logs(&self, ledger: RunLedger) -> Result<ErrorTally> {
        let settings = &self.ctx.settings;
        let tally = self
            .ctx
            .classifier
            .classify(&settings.hosts, &settings.log_path)?;
        let expected = ledger.expected_signals + 1;
        self.ctx.activity.send(ActivityEvent::LogsTallied {
            trial: self.number(),
            expected_signals: tally.expected_signals,
            other_errors: tally.other_errors,
            ledger_expected: expected,
        });

        if !tally.is_clean() {
            return Err(ContractViolation::UnexpectedLogErrors {
                count: tally.other_errors,
                log: settings.log_path.display().to_string(),
            }
            .into());
        }
        if tally.expected_signals != expected {
            return Err(ContractViolation::SignalCountMismatch {
                expected,
                found: tally.expected_signals,
            }
            .into());
        }
        Ok(tally)
    }

    /// Destroy every container; returns the pre-teardown free percentage.
    fn teardown(&self) -> Result<(f64, usize)> {
        let tier = self.ctx.settings.tier;
        let pool = self.ctx.probe.pool();
        let started = Instant::now();

        let baseline = self.ctx.probe.free_pct(tier)?;
        self.ctx.activity.send(ActivityEvent::CapacitySampled {
            trial: self.number(),
            tier,
            free_pct: baseline,
            stage: "before_teardown",
        });

        let containers = self.ctx.service.list_containers(pool)?;
        for container in &containers {
            self.ctx.service.destroy_container(pool, container)?;
        }

        let leftover = self.ctx.service.list_containers(pool)?;
        if !leftover.is_empty() {
            return Err(ContractViolation::LeftoverContainers {
                count: leftover.len(),
                containers: leftover.iter().map(ToString::to_string).collect(),
            }
            .into());
        }

        self.ctx.activity.send(ActivityEvent::ContainersDestroyed {
            trial: self.number(),
            count: containers.len() as u64,
            duration_ms: elapsed_ms(started),
        });
        Ok((baseline, containers.len()))
    }

    fn verify_reclaim(&self, baseline_free_pct: f64) -> Result<ReclaimMeasurement> {
        let tier = self.ctx.settings.tier;
        let threshold = self.ctx.waiter.threshold_pct();
        let measurement = self.ctx.waiter.wait(&self.ctx.probe, tier)?;
        let ok = measurement.free_pct >= threshold && measurement.free_pct >= baseline_free_pct;

        #[allow(clippy::cast_possible_truncation)]
        let waited_ms = measurement.waited.as_millis() as u64;
        self.ctx.activity.send(ActivityEvent::ReclaimMeasured {
            trial: self.number(),
            tier,
            free_pct: measurement.free_pct,
            probes: measurement.probes,
            waited_ms,
            ok,
        });

        if measurement.free_pct < threshold {
            return Err(ContractViolation::ReclaimBelowThreshold {
                tier,
                free_pct: measurement.free_pct,
                threshold,
            }
            .into());
        }
        if measurement.free_pct < baseline_free_pct {
            return Err(ContractViolation::FreeSpaceRegressed {
                tier,
                before: baseline_free_pct,
                after: measurement.free_pct,
            }
            .into());
        }
        Ok(measurement)
    }
}

//! Repeats the exhaustion trial and finishes with a smoke fill.

#![allow(missing_docs)]

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::errors::{ContractViolation, PxhError, Result};
use crate::load::driver::FillOutcome;
use crate::logger::activity::ActivityEvent;
use crate::protocol::trial::{ExhaustionTrial, RunLedger, TrialContext, TrialPhase, TrialReport};

/// Everything a completed sequence established.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
    pub ledger: RunLedger,
    pub trials: Vec<TrialReport>,
    pub smoke_fill: FillOutcome,
    #[serde(rename = "duration_ms", serialize_with = "millis")]
    pub duration: Duration,
}

#[allow(clippy::cast_possible_truncation)]
fn millis<S: serde::Serializer>(value: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(value.as_millis() as u64)
}

/// A failed sequence: where it stopped and why.
#[derive(Debug)]
pub struct SequenceFailure {
    /// Ledger as of the last passed trial.
    pub ledger: RunLedger,
    /// Failing trial index, or `None` for the smoke fill.
    pub trial: Option<u32>,
    pub phase: Option<TrialPhase>,
    pub error: PxhError,
}

impl std::fmt::Display for SequenceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.trial, self.phase) {
            (Some(trial), Some(phase)) => {
                write!(f, "trial {} failed during {phase:?}: {}", trial + 1, self.error)
            }
            _ => write!(f, "smoke fill failed: {}", self.error),
        }
    }
}

/// Runs `iterations` trials back to back, threading the ledger through them.
pub struct TrialSequencer<'a> {
    ctx: &'a TrialContext,
    iterations: u32,
    final_fill_pct: f64,
}

impl<'a> TrialSequencer<'a> {
    #[must_use]
    pub const fn new(ctx: &'a TrialContext, iterations: u32, final_fill_pct: f64) -> Self {
        Self {
            ctx,
            iterations,
            final_fill_pct,
        }
    }

    /// Stops at the first failing trial; later trials never run.
    pub fn run(&self) -> std::result::Result<SequenceReport, SequenceFailure> {
        let started = Instant::now();
        let mut ledger = RunLedger::default();
        let mut trials = Vec::new();

        for index in 0..self.iterations {
            let mut trial = ExhaustionTrial::new(index, self.ctx);
            match trial.run(ledger) {
                Ok(report) => {
                    ledger = report.ledger;
                    trials.push(report);
                }
                Err(error) => {
                    self.report_failure(Some(index), &error);
                    return Err(SequenceFailure {
                        ledger,
                        trial: Some(index),
                        phase: Some(trial.phase()),
                        error,
                    });
                }
            }
        }

        let smoke_fill = self.smoke_fill().map_err(|error| {
            self.report_failure(None, &error);
            SequenceFailure {
                ledger,
                trial: None,
                phase: None,
                error,
            }
        })?;

        Ok(SequenceReport {
            ledger,
            trials,
            smoke_fill,
            duration: started.elapsed(),
        })
    }

    /// A small write after the loop proves the pool is usable again.
    fn smoke_fill(&self) -> Result<FillOutcome> {
        let tier = self.ctx.settings.tier;
        let outcome = self.ctx.driver.fill(tier, self.final_fill_pct)?;
        match &outcome {
            FillOutcome::Completed { .. } => Ok(outcome),
            FillOutcome::CapacityExceeded { detail, .. } | FillOutcome::Failed { detail, .. } => {
                Err(ContractViolation::SmokeFillFailed {
                    tier,
                    pct: self.final_fill_pct,
                    detail: detail.clone(),
                }
                .into())
            }
        }
    }

    fn report_failure(&self, trial: Option<u32>, error: &PxhError) {
        self.ctx.activity.send(ActivityEvent::Failure {
            trial: trial.map(|index| index + 1),
            code: error.code().to_string(),
            message: error.to_string(),
        });
    }
}

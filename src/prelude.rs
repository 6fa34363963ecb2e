//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use pool_exhaustion_harness::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, ReclaimStrategy};
pub use crate::core::errors::{ContractViolation, ErrorCategory, PxhError, Result};
pub use crate::core::tier::Tier;

// Collaborators
pub use crate::cluster::pool::{
    CapacityReport, ContainerHandle, PoolHandle, PoolService, PoolSize, TierUsage,
};
pub use crate::cluster::remote::{LogLocator, RemoteCommand, RemoteExecutor};
pub use crate::cluster::sim::{SimConfig, SimFault, SimulatedPool};
pub use crate::load::workload::Workload;

// Protocol building blocks
pub use crate::classify::log_classifier::{ErrorTally, LogClassifier, tally_lines};
pub use crate::load::driver::{FillOutcome, LoadDriver};
pub use crate::monitor::capacity::CapacityProbe;
pub use crate::protocol::scenario::{Collaborators, ExhaustionScenario, PoolTarget, RunSummary};
pub use crate::protocol::sequencer::{SequenceReport, TrialSequencer};
pub use crate::protocol::trial::{ExhaustionTrial, RunLedger, TrialReport};

// Logging
pub use crate::logger::activity::ActivityLoggerHandle;

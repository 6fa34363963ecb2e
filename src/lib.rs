#![forbid(unsafe_code)]

//! Pool Exhaustion Harness (pxh): drives a storage pool to capacity
//! exhaustion and checks that it behaves.
//!
//! Each trial fills a tier to a nominal level, attempts an overfill that must
//! be refused with a capacity-exceeded error, checks the client logs contain
//! exactly the expected exhaustion signals, destroys every container, and
//! verifies the space comes back.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pool_exhaustion_harness::prelude::*;
//!
//! let config = Config::default();
//! let sim = Arc::new(SimulatedPool::new(SimConfig::default()));
//! let scenario = ExhaustionScenario::new(
//!     &config,
//!     Collaborators::simulated(&sim),
//!     ActivityLoggerHandle::detached(),
//! );
//! let summary = scenario.run(PoolTarget::from_config(&config, None))?;
//! assert!(summary.passed());
//! # Ok::<(), PxhError>(())
//! ```

pub mod prelude;

pub mod classify;
pub mod cluster;
pub mod core;
pub mod load;
pub mod logger;
pub mod monitor;
pub mod protocol;

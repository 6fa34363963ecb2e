//! The capacity-exhaustion protocol: trials, their sequencing, and run setup.

pub mod reclaim;
pub mod scenario;
pub mod sequencer;
pub mod trial;

#[cfg(test)]
mod test_harness;

//! Pool space monitoring.

pub mod capacity;

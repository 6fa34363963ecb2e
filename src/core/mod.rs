//! Core types: errors, configuration, storage tiers.

pub mod config;
pub mod errors;
pub mod tier;

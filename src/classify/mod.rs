//! Log classification: turning collected client log lines into an error tally.

pub mod log_classifier;

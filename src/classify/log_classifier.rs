//! Client log classification into expected exhaustion signals and other errors.
//!
//! Collection and classification are separate: [`LogClassifier::collect`]
//! gathers error-marked lines from every host (blocking until all answered),
//! and [`tally_lines`] is a pure scan over the resulting lines.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use memchr::memmem;
use serde::Serialize;

use crate::cluster::remote::{RemoteCommand, RemoteExecutor};
use crate::core::config::LogsConfig;
use crate::core::errors::{PxhError, Result};

/// Counts of collected error lines by class. Cumulative over the whole log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorTally {
    pub expected_signals: u64,
    pub other_errors: u64,
}

impl ErrorTally {
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.other_errors == 0
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.expected_signals + self.other_errors
    }
}

/// Classify lines: containing `marker` is an expected signal, anything else
/// non-blank is another error.
#[must_use]
pub fn tally_lines<S: AsRef<str>>(lines: &[S], marker: &str) -> ErrorTally {
    let finder = memmem::Finder::new(marker.as_bytes());
    lines
        .iter()
        .map(AsRef::as_ref)
        .filter(|line| !line.trim().is_empty())
        .fold(ErrorTally::default(), |mut tally, line| {
            if finder.find(line.as_bytes()).is_some() {
                tally.expected_signals += 1;
            } else {
                tally.other_errors += 1;
            }
            tally
        })
}

/// Collects error lines from client hosts and tallies them.
pub struct LogClassifier {
    remote: Arc<dyn RemoteExecutor>,
    error_marker: String,
    exhaustion_marker: String,
}

impl LogClassifier {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteExecutor>, config: &LogsConfig) -> Self {
        Self {
            remote,
            error_marker: config.error_marker.clone(),
            exhaustion_marker: config.exhaustion_marker.clone(),
        }
    }

    /// Error-marked lines from every host, concatenated in host order.
    ///
    /// Any host answering with a non-zero exit code fails the whole collection.
    pub fn collect(&self, hosts: &[String], log_path: &Path) -> Result<Vec<String>> {
        let command = RemoteCommand::grep(&self.error_marker, log_path);
        let outputs = self.remote.run(hosts, &command)?;

        let mut lines = Vec::new();
        for output in outputs {
            if output.exit_code != 0 {
                return Err(PxhError::RemoteCommand {
                    host: output.host,
                    command: command.render(),
                    code: output.exit_code,
                    details: if output.stderr.trim().is_empty() {
                        "no matching lines or unreadable log".to_string()
                    } else {
                        output.stderr.trim().to_string()
                    },
                });
            }
            lines.extend(output.stdout.lines().map(ToString::to_string));
        }
        Ok(lines)
    }

    pub fn classify(&self, hosts: &[String], log_path: &Path) -> Result<ErrorTally> {
        let lines = self.collect(hosts, log_path)?;
        Ok(self.tally(&lines))
    }

    #[must_use]
    pub fn tally<S: AsRef<str>>(&self, lines: &[S]) -> ErrorTally {
        tally_lines(lines, &self.exhaustion_marker)
    }
}

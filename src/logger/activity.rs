//! Run activity logger: a dedicated thread owns the JSONL writer.
//!
//! Protocol code sends `ActivityEvent`s through a bounded crossbeam channel
//! with `try_send`, so a slow disk never stalls a trial. Events that do not
//! fit are counted and reported in the log once the thread catches up.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{PxhError, Result};
use crate::core::tier::Tier;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

/// Events emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    RunStarted {
        version: String,
        config_hash: String,
        pool: String,
        tier: Tier,
        iterations: u32,
    },
    CapacitySampled {
        trial: u32,
        tier: Tier,
        free_pct: f64,
        stage: &'static str,
    },
    FillFinished {
        trial: u32,
        tier: Tier,
        pct: f64,
        container: String,
        bytes: u64,
        outcome: &'static str,
        duration_ms: u64,
        detail: Option<String>,
    },
    LogsTallied {
        trial: u32,
        expected_signals: u64,
        other_errors: u64,
        ledger_expected: u64,
    },
    ContainersDestroyed {
        trial: u32,
        count: u64,
        duration_ms: u64,
    },
    ReclaimMeasured {
        trial: u32,
        tier: Tier,
        free_pct: f64,
        probes: u32,
        waited_ms: u64,
        ok: bool,
    },
    TrialPassed {
        trial: u32,
        duration_ms: u64,
    },
    RunFinished {
        trials: u32,
        expected_signals: u64,
        ok: bool,
        duration_ms: u64,
    },
    Failure {
        trial: Option<u32>,
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Cheaply cloneable sender side of the activity logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle whose events go nowhere, for runs without a log file.
    #[must_use]
    pub fn detached() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Non-blocking send; a full channel drops the event and counts it.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to finish; join its handle to wait for the flush.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

pub struct ActivityLoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    #[must_use]
    pub fn new(jsonl: JsonlConfig) -> Self {
        Self {
            jsonl,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread.
///
/// It runs until `shutdown()` is called or every handle has been dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let jsonl = config.jsonl;
    let join = thread::Builder::new()
        .name("pxh-logger".to_string())
        .spawn(move || logger_thread_main(&rx, jsonl, &dropped))
        .map_err(|e| PxhError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Failure, Severity::Warning);
            warn.details = Some(format!("{lost} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }
        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::RunStarted {
            version,
            config_hash,
            pool,
            tier,
            iterations,
        } => {
            let mut e = LogEntry::new(EventType::RunStart, Severity::Info);
            e.pool = Some(pool.clone());
            e.tier = Some(*tier);
            e.count = Some(u64::from(*iterations));
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e
        }
        ActivityEvent::CapacitySampled {
            trial,
            tier,
            free_pct,
            stage,
        } => {
            let mut e = LogEntry::new(EventType::CapacitySample, Severity::Info);
            e.trial = Some(*trial);
            e.tier = Some(*tier);
            e.free_pct = Some(*free_pct);
            e.details = Some((*stage).to_string());
            e
        }
        ActivityEvent::FillFinished {
            trial,
            tier,
            pct,
            container,
            bytes,
            outcome,
            duration_ms,
            detail,
        } => {
            let mut e = LogEntry::new(EventType::Fill, Severity::Info);
            e.trial = Some(*trial);
            e.tier = Some(*tier);
            e.pct = Some(*pct);
            e.container = Some(container.clone());
            e.bytes = Some(*bytes);
            e.outcome = Some((*outcome).to_string());
            e.duration_ms = Some(*duration_ms);
            e.details.clone_from(detail);
            e
        }
        ActivityEvent::LogsTallied {
            trial,
            expected_signals,
            other_errors,
            ledger_expected,
        } => {
            let ok = *other_errors == 0 && expected_signals == ledger_expected;
            let mut e = LogEntry::new(
                EventType::LogTally,
                if ok { Severity::Info } else { Severity::Critical },
            );
            e.trial = Some(*trial);
            e.expected_signals = Some(*expected_signals);
            e.other_errors = Some(*other_errors);
            e.ok = Some(ok);
            e.details = Some(format!("ledger expects {ledger_expected}"));
            e
        }
        ActivityEvent::ContainersDestroyed {
            trial,
            count,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::Teardown, Severity::Info);
            e.trial = Some(*trial);
            e.count = Some(*count);
            e.duration_ms = Some(*duration_ms);
            e
        }
        ActivityEvent::ReclaimMeasured {
            trial,
            tier,
            free_pct,
            probes,
            waited_ms,
            ok,
        } => {
            let mut e = LogEntry::new(
                EventType::Reclaim,
                if *ok { Severity::Info } else { Severity::Critical },
            );
            e.trial = Some(*trial);
            e.tier = Some(*tier);
            e.free_pct = Some(*free_pct);
            e.count = Some(u64::from(*probes));
            e.duration_ms = Some(*waited_ms);
            e.ok = Some(*ok);
            e
        }
        ActivityEvent::TrialPassed { trial, duration_ms } => {
            let mut e = LogEntry::new(EventType::TrialPassed, Severity::Info);
            e.trial = Some(*trial);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::RunFinished {
            trials,
            expected_signals,
            ok,
            duration_ms,
        } => {
            let mut e = LogEntry::new(
                EventType::RunFinish,
                if *ok { Severity::Info } else { Severity::Critical },
            );
            e.count = Some(u64::from(*trials));
            e.expected_signals = Some(*expected_signals);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*ok);
            e
        }
        ActivityEvent::Failure {
            trial,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::Failure, Severity::Critical);
            e.trial = *trial;
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::RunFinish, Severity::Info),
    }
}

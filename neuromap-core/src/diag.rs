//! Bounded diagnostics hand-off from the solve context to the display context.
//!
//! Producers never block: once a queue holds `capacity` messages further ones
//! are dropped and counted. The display context calls
//! [`DiagnosticsSink::flush`] once per cycle to forward everything to `log`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

/// Producer handle, cheap to clone into any thread.
#[derive(Clone, Debug)]
pub struct Diagnostics {
    info_tx: SyncSender<String>,
    error_tx: SyncSender<String>,
    dropped: Arc<AtomicUsize>,
}

/// Consumer half, owned by the display context.
#[derive(Debug)]
pub struct DiagnosticsSink {
    info_rx: Receiver<String>,
    error_rx: Receiver<String>,
    dropped: Arc<AtomicUsize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub info: usize,
    pub error: usize,
    pub dropped: usize,
}

pub fn channel(capacity: usize) -> (Diagnostics, DiagnosticsSink) {
    let capacity = capacity.max(1);
    let (info_tx, info_rx) = sync_channel(capacity);
    let (error_tx, error_rx) = sync_channel(capacity);
    let dropped = Arc::new(AtomicUsize::new(0));
    (
        Diagnostics {
            info_tx,
            error_tx,
            dropped: Arc::clone(&dropped),
        },
        DiagnosticsSink {
            info_rx,
            error_rx,
            dropped,
        },
    )
}

impl Diagnostics {
    /// Queue an informational message. Returns false if it was dropped.
    pub fn info(&self, msg: impl Into<String>) -> bool {
        self.push(&self.info_tx, msg.into())
    }

    /// Queue an error message. Returns false if it was dropped.
    pub fn error(&self, msg: impl Into<String>) -> bool {
        self.push(&self.error_tx, msg.into())
    }

    fn push(&self, tx: &SyncSender<String>, msg: String) -> bool {
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            // display side is gone, nobody will read it
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl DiagnosticsSink {
    /// Forward queued messages through `log`, then report drops once.
    pub fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();
        for (severity, msg) in self.drain() {
            match severity {
                Severity::Info => {
                    log::info!("{msg}");
                    report.info += 1;
                }
                Severity::Error => {
                    log::error!("{msg}");
                    report.error += 1;
                }
            }
        }
        report.dropped = self.dropped.swap(0, Ordering::Relaxed);
        if report.dropped > 0 {
            log::warn!("dropped {} diagnostic messages this cycle", report.dropped);
        }
        report
    }

    /// Take every queued message without logging it.
    pub fn drain(&self) -> Vec<(Severity, String)> {
        let mut out: Vec<(Severity, String)> = self.info_rx.try_iter().map(|m| (Severity::Info, m)).collect();
        out.extend(self.error_rx.try_iter().map(|m| (Severity::Error, m)));
        out
    }
}

/// Latch for anomalies that should be reported a single time.
#[derive(Debug, Default)]
pub struct OnceFlag(AtomicBool);

impl OnceFlag {
    pub fn new() -> OnceFlag {
        OnceFlag(AtomicBool::new(false))
    }

    /// True on the first call only.
    pub fn first(&self) -> bool {
        !self.0.swap(true, Ordering::Relaxed)
    }
}

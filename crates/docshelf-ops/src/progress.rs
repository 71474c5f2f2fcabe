//! Progress events and monotonic progress reporting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use docshelf_core::ProgressSink;
use tokio::sync::mpsc;

use crate::error::ExecError;
use crate::outcome::TransferOutcome;

/// Progress information for an ongoing transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Overall fraction in `[0, 1]`, never decreasing.
    pub fraction: f64,
    /// Title of the item in flight, when known.
    pub current: Option<String>,
}

impl TransferProgress {
    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        self.fraction * 100.0
    }
}

/// Result sent through the channel during a transfer started with
/// [`TransferExecutor::start`](crate::TransferExecutor::start).
#[derive(Debug)]
pub enum TransferEvent {
    /// Progress update.
    Progress(TransferProgress),
    /// The transfer finished.
    Complete(Result<TransferOutcome, ExecError>),
}

/// Forwards reports to an inner sink, clamped to `[0, 1]` and never going
/// backwards.
pub(crate) struct ProgressGate {
    sink: Arc<dyn ProgressSink>,
    // Bits of a non-negative f64; their integer order matches float order.
    high_water: AtomicU64,
}

impl ProgressGate {
    pub(crate) fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            high_water: AtomicU64::new(0f64.to_bits()),
        }
    }
}

impl ProgressSink for ProgressGate {
    fn report(&self, fraction: f64, message: Option<&str>) {
        if fraction.is_nan() {
            return;
        }
        let bits = fraction.clamp(0.0, 1.0).to_bits();
        let previous = self.high_water.fetch_max(bits, Ordering::AcqRel);
        self.sink.report(f64::from_bits(previous.max(bits)), message);
    }
}

/// Sends progress over a transfer event channel without blocking.
///
/// Reports are dropped while the channel is full.
pub(crate) struct ChannelSink {
    pub(crate) tx: mpsc::Sender<TransferEvent>,
}

impl ProgressSink for ChannelSink {
    fn report(&self, fraction: f64, message: Option<&str>) {
        let _ = self.tx.try_send(TransferEvent::Progress(TransferProgress {
            fraction,
            current: message.map(str::to_string),
        }));
    }
}

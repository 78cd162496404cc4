//! Injected metrics sink for the distance table hot path.
//!
//! The engine never owns a global timer registry; callers hand it an
//! `Arc<dyn MetricsSink>` and every table operation reports one timing
//! event through it. The hot path cost with [`NullMetrics`] is a single
//! virtual call per operation and no allocation.

use std::time::{Duration, Instant};

/// Table operations that report timing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOp {
    /// Full-table recompute (`evaluate`)
    Evaluate,
    /// Trial move computation (`propose_move`)
    Move,
    /// Accepted-move row/column update (`accept_move`)
    Update,
    /// Rejected-move backup restore
    CopyOld,
    /// Batched cross-replica dispatch (kernel + transfers)
    Offload,
}

impl TableOp {
    /// Stable name for log/telemetry output.
    pub fn name(&self) -> &'static str {
        match self {
            TableOp::Evaluate => "evaluate",
            TableOp::Move => "move",
            TableOp::Update => "update",
            TableOp::CopyOld => "copy_old",
            TableOp::Offload => "offload",
        }
    }
}

/// Sink receiving one event per timed table operation.
///
/// Implementations must be cheap and non-blocking; the engine calls
/// `record` from its hot loop.
pub trait MetricsSink: Send + Sync {
    fn record(&self, op: TableOp, elapsed: Duration);
}

/// Discards all events (the default sink).
#[derive(Debug, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn record(&self, _op: TableOp, _elapsed: Duration) {}
}

/// Forwards events to the `log` crate at trace level.
#[derive(Debug, Default)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn record(&self, op: TableOp, elapsed: Duration) {
        log::trace!("table op {} took {:?}", op.name(), elapsed);
    }
}

/// RAII guard reporting the enclosed scope's duration on drop.
pub struct ScopedTimer<'a> {
    sink: &'a dyn MetricsSink,
    op: TableOp,
    start: Instant,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(sink: &'a dyn MetricsSink, op: TableOp) -> Self {
        Self {
            sink,
            op,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        self.sink.record(self.op, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(AtomicUsize);

    impl MetricsSink for CountingSink {
        fn record(&self, _op: TableOp, _elapsed: Duration) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_scoped_timer_records_on_drop() {
        let sink = CountingSink(AtomicUsize::new(0));
        {
            let _t = ScopedTimer::new(&sink, TableOp::Evaluate);
        }
        {
            let _t = ScopedTimer::new(&sink, TableOp::Move);
        }
        assert_eq!(sink.0.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_op_names() {
        assert_eq!(TableOp::Offload.name(), "offload");
        assert_eq!(TableOp::CopyOld.name(), "copy_old");
    }
}

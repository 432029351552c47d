//! Cooperative cancellation and progress reporting (spec.md §5, §6).
//!
//! One process-wide-equivalent atomic flag per run; the UI layer (external,
//! spec.md §1) sets it, stages check it at loop heads, workers check it
//! before each dequeue and again before the copy call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Thread-safe, cloneable cancel flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Callback receiving `(percent, processed, total)`, invoked at most every
/// 5 seconds per percent step (spec.md §6). Construction of the throttle is
/// the caller's responsibility via [`ProgressThrottle`]; the sink itself is
/// a plain callback so the core has no opinion on how progress is rendered.
pub type ProgressSink = Arc<dyn Fn(u8, u64, u64) + Send + Sync>;

/// Throttles calls into a [`ProgressSink`] so stages can call `tick` freely
/// without flooding the sink.
pub struct ProgressThrottle {
    sink: ProgressSink,
    total: u64,
    last_percent: std::sync::atomic::AtomicI64,
    last_emit: std::sync::Mutex<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(sink: ProgressSink, total: u64) -> Self {
        ProgressThrottle {
            sink,
            total,
            last_percent: std::sync::atomic::AtomicI64::new(-1),
            last_emit: std::sync::Mutex::new(Instant::now() - Duration::from_secs(5)),
            min_interval: Duration::from_secs(5),
        }
    }

    /// Report that `processed` out of `total` items are done. Emits to the
    /// sink only when the percent step changed and at least `min_interval`
    /// has elapsed since the last emission.
    pub fn tick(&self, processed: u64) {
        let percent = if self.total == 0 {
            100
        } else {
            ((processed.min(self.total) * 100) / self.total) as u8
        };

        let prev = self.last_percent.load(Ordering::Relaxed);
        if prev == percent as i64 {
            return;
        }

        let mut last_emit = self.last_emit.lock().unwrap();
        if last_emit.elapsed() < self.min_interval && percent != 100 {
            return;
        }

        self.last_percent.store(percent as i64, Ordering::Relaxed);
        *last_emit = Instant::now();
        (self.sink)(percent, processed, self.total);
    }
}

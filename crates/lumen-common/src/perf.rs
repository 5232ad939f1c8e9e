//! Performance timing utilities for instrumentation.

use web_time::Instant;

/// Milliseconds elapsed since the first call in this process.
pub fn now() -> f64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_secs_f64() * 1000.0
}

/// Measure the execution time of a closure and log it.
pub fn measure<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = now();
    let result = f();
    let elapsed = now() - start;
    tracing::debug!(target: "lumen::perf", elapsed_ms = elapsed, "{}", label);
    result
}

/// Logs elapsed time when dropped.
pub struct TimingGuard {
    label: &'static str,
    start: f64,
}

impl TimingGuard {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            start: now(),
        }
    }

    /// Milliseconds since the guard was created.
    pub fn elapsed_ms(&self) -> f64 {
        now() - self.start
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        tracing::debug!(
            target: "lumen::perf",
            elapsed_ms = self.elapsed_ms(),
            "{}",
            self.label
        );
    }
}

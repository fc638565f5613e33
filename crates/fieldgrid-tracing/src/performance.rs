//! Timing guards and standard events for device-side work.
//!
//! ```rust
//! use fieldgrid_tracing::performance::{record_transfer, PerformanceSpan};
//!
//! {
//!     let _span = PerformanceSpan::new("resize_transaction", Some(100));
//!     // ... free and reallocate mesh buffers ...
//! } // reported only if it took at least 100µs
//!
//! record_transfer(4096, "H2D", 250);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::Level;

static PERF_ENABLED: AtomicBool = AtomicBool::new(true);
static PERF_THRESHOLD_US: AtomicU64 = AtomicU64::new(0);

/// Set process-wide reporting for [`PerformanceSpan`]s.
///
/// Spans built without their own threshold use `threshold_us`. Called by
/// [`crate::init_global_tracing`] with the config's performance settings.
pub fn configure(enabled: bool, threshold_us: Option<u64>) {
    PERF_ENABLED.store(enabled, Ordering::Relaxed);
    PERF_THRESHOLD_US.store(threshold_us.unwrap_or(0), Ordering::Relaxed);
}

/// Whether performance spans currently report.
pub fn is_enabled() -> bool {
    PERF_ENABLED.load(Ordering::Relaxed)
}

/// Threshold applied to spans that were built without one.
pub fn default_threshold_us() -> u64 {
    PERF_THRESHOLD_US.load(Ordering::Relaxed)
}

/// RAII timer that reports its duration on drop, optionally only above a
/// threshold.
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Start a debug-level span. `threshold_us = None` falls back to
    /// [`default_threshold_us`].
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, name, threshold_us)
    }

    /// Start a span at an explicit level.
    pub fn with_level(level: Level, name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = name.into();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };

        Self {
            name,
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Microseconds since the span started.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Enter the underlying tracing span.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        if !is_enabled() {
            return;
        }
        let elapsed_us = self.elapsed_us();
        let threshold = self.threshold_us.unwrap_or_else(default_threshold_us);
        if elapsed_us >= threshold {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Bandwidth in MiB/s, zero when the duration rounds to nothing.
pub fn bandwidth_mibps(bytes: usize, duration_us: u64) -> f64 {
    if duration_us == 0 {
        return 0.0;
    }
    (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
}

/// Record a device buffer allocation.
///
/// `resource` names what the buffer backs (e.g. `"magnetization"`,
/// `"scratch_pool"`).
pub fn record_allocation(size_bytes: usize, resource: &str, duration_us: u64) {
    tracing::debug!(
        event = "allocation",
        size_bytes = size_bytes,
        size_kb = size_bytes as f64 / 1024.0,
        resource = resource,
        duration_us = duration_us,
        "device_allocation"
    );
}

/// Record a host/device copy. `direction` is `"H2D"` or `"D2H"`.
pub fn record_transfer(bytes: usize, direction: &str, duration_us: u64) {
    let bandwidth = bandwidth_mibps(bytes, duration_us);
    tracing::debug!(
        event = "transfer",
        bytes = bytes,
        kb = bytes as f64 / 1024.0,
        direction = direction,
        duration_us = duration_us,
        bandwidth_mbps = bandwidth,
        "data_transfer"
    );
}

/// Record the outcome of a mesh resize transaction.
pub fn record_resize(freed_resources: usize, reallocated_resources: usize, duration_us: u64) {
    tracing::debug!(
        event = "resize",
        freed = freed_resources,
        reallocated = reallocated_resources,
        duration_us = duration_us,
        duration_ms = duration_us as f64 / 1000.0,
        "resize_transaction"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_performance_span_creation() {
        let span = PerformanceSpan::new("resize", None);
        assert_eq!(span.name(), "resize");
        assert_eq!(span.threshold_us, None);
    }

    #[test]
    fn test_performance_span_elapsed() {
        let span = PerformanceSpan::new("sleep", Some(1));
        thread::sleep(Duration::from_millis(5));
        assert!(span.elapsed_us() >= 5_000);
    }

    #[test]
    fn test_performance_span_with_level() {
        let span = PerformanceSpan::with_level(Level::INFO, "upload", Some(100));
        assert_eq!(span.name(), "upload");
        assert_eq!(span.threshold_us, Some(100));
    }

    #[test]
    fn test_configure_sets_process_defaults() {
        configure(false, Some(250));
        assert!(!is_enabled());
        assert_eq!(default_threshold_us(), 250);
        drop(PerformanceSpan::new("muted", None));

        configure(true, None);
        assert!(is_enabled());
        assert_eq!(default_threshold_us(), 0);
    }

    #[test]
    fn test_bandwidth_calculation() {
        // 1 MiB in 1 ms
        let bandwidth = bandwidth_mibps(1024 * 1024, 1000);
        assert!((bandwidth - 1000.0).abs() < 0.01);
        assert_eq!(bandwidth_mibps(4096, 0), 0.0);
    }

    #[test]
    fn test_recorders_do_not_panic() {
        record_allocation(1024, "magnetization", 12);
        record_transfer(4096, "H2D", 250);
        record_resize(5, 3, 900);
    }
}

//! Instrumentation macros.

/// Start a [`crate::performance::PerformanceSpan`], optionally recording
/// extra fields on an enclosing debug span.
///
/// ```rust
/// use fieldgrid_tracing::perf_span;
///
/// {
///     let _span = perf_span!("allocate_for_new_mesh", cells = 4096, components = 3);
///     // ... allocate ...
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let _span = tracing::debug_span!(
            "perf",
            name = $name,
            $($field = $value),+
        ).entered();
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}

/// Emit a debug event tagged with `event = $name`.
///
/// ```rust
/// use fieldgrid_tracing::perf_event;
///
/// perf_event!("chunk_uploaded", elements = 16, stream = 1);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        tracing::debug!(
            event = $name,
            $($field = $value),+
        );
    };
}

/// Time a block, returning `(result, duration_us)`.
///
/// ```rust
/// use fieldgrid_tracing::timed_block;
///
/// let (cells, duration_us) = timed_block!("count_cells", { 64 * 64 * 8 });
/// assert_eq!(cells, 32768);
/// # let _ = duration_us;
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(
            operation = $name,
            duration_us = duration_us,
            "timed_block_complete"
        );
        (result, duration_us)
    }};
}

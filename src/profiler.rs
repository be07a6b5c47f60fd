//! Optional instrumentation collaborator.
//!
//! The media pipeline may inject a profiler when constructing the
//! factory; created encoders are then wrapped so the data-plane encode
//! call is measured. The crate only consumes these traits — the actual
//! profiler lives with the embedder.

/// Category a marker is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerCategory {
    /// Codec work (encode/decode).
    Codec,
    /// Anything else.
    Other,
}

/// Opaque handle to a named marker created by the profiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerHandle(pub u64);

/// RAII scope returned by the profiler. Dropping the guard records the
/// end of the measured span (or deregisters the thread), so a span
/// closes on every exit path.
pub trait ProfilerScope: Send {}

/// Factory for named markers and scoped measurements.
pub trait ProfilerMarkerFactory: Send + Sync {
    /// Create a named marker to measure against.
    fn create_marker(&self, name: &str, category: MarkerCategory) -> MarkerHandle;

    /// Register the calling thread under a group/name pair. The
    /// registration ends when the returned guard drops.
    fn begin_thread_scope(&self, group: &str, name: &str) -> Box<dyn ProfilerScope>;

    /// Start a measurement against `marker`; it ends when the guard
    /// drops.
    fn begin_sample(&self, marker: MarkerHandle) -> Box<dyn ProfilerScope>;
}

//! Metrics for request-scoped pooling.
//!
//! The events are thread-local so that borrowing on many threads at once does not contend
//! on shared counters. Use `nm::Report::collect()` to read them.

use nm::{Event, Magnitude};

/// Histogram buckets for the number of objects returned by one drain.
///
/// Most requests borrow a handful of objects; long tails indicate handlers that borrow in
/// loops and might be better served by one larger shape.
const DRAIN_RECORDS_BUCKETS: &[Magnitude] = &[0, 1, 2, 4, 8, 16, 32, 64, 128, 256];

thread_local! {
    /// Objects borrowed through a request factory.
    pub(crate) static BORROWS: Event = Event::builder()
        .name("request_pool_borrows")
        .build();

    /// Completed drains, whichever path triggered them.
    pub(crate) static DRAINS: Event = Event::builder()
        .name("request_pool_drains")
        .build();

    /// Number of pending records processed by each drain.
    pub(crate) static DRAIN_RECORDS: Event = Event::builder()
        .name("request_pool_drain_records")
        .histogram(DRAIN_RECORDS_BUCKETS)
        .build();

    /// Release tasks that hit the ceiling before the request completed.
    pub(crate) static CEILING_EXPIRED: Event = Event::builder()
        .name("request_pool_ceiling_expired")
        .build();

    /// Reset functions that panicked; the affected object was discarded.
    pub(crate) static RESET_PANICS: Event = Event::builder()
        .name("request_pool_reset_panics")
        .build();
}

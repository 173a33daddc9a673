//! Lifecycle-event ingestion: validation, at-most-one billing for
//! performance pricing, cache counting, and buffered durable writes.

pub mod service;

pub use service::TrackingService;

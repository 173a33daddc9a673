//! REST surface: OpenRTB bid endpoint, campaign management, lifecycle-event
//! ingestion, health, and Prometheus exposition.

pub mod models;
pub mod rest;
pub mod router;
pub mod server;

pub use server::ApiServer;

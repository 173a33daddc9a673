//! NATS-backed event bus. Publishes domain events to named subjects,
//! fire-and-forget from the caller's perspective.

pub mod nats;

pub use nats::NatsBus;

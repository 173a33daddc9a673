//! Fast-store: Redis-backed atomic counters for live budgets, frequency
//! caps, real-time metrics, pacing rates, and rate limits.

pub mod client;
pub mod keys;

pub use client::RedisStore;

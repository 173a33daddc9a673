//! Second-price auction engine: eligibility fan-out, scoring, price
//! resolution, and atomic budget commit under a fixed deadline.

pub mod engine;

pub use engine::AuctionEngine;

//! Campaign service: CRUD, budget commits, frequency caps, pacing, and the
//! daily reset. Mediates between the fast store and the durable store.

pub mod service;

pub use service::CampaignService;

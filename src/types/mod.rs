//! Core domain types for the webhook listener.

pub mod ids;

pub use ids::{DeliveryId, RepoName};

//! Client for the utility-billing balance lookup.
//!
//! This crate provides:
//! - A typed error taxonomy for lookup failures
//! - The `BalanceSource` seam used by the sweep and the chat commands
//! - An HTTP implementation with a bounded timeout
//! - Extraction of account ids from the links users paste

pub mod client;
pub mod error;
pub mod link;

pub use client::{BalanceSource, BillingClient, BillingConfig};
pub use error::QueryError;
pub use link::extract_account_id;

//! Core data types for the balance monitor.

pub mod balance;
pub mod document;
pub mod ids;
pub mod timestamp;

pub use balance::*;
pub use document::*;
pub use ids::*;

//! Low-balance alerting for chat groups.
//!
//! This crate provides:
//! - JSON document storage for per-group bindings and alert history
//! - The alert gate (once per interval per group member)
//! - The sweep that checks every binding and sends alerts
//! - Group chat commands and the OneBot transport

pub mod command;
pub mod config;
pub mod gate;
pub mod notifier;
pub mod onebot;
pub mod store;
pub mod sweep;
pub mod switch;

pub use command::{format_account_report, Command, CommandError, CommandHandler, GroupMessage};
pub use config::AlertPolicy;
pub use gate::AlertGate;
pub use notifier::{Notifier, NotifyError};
pub use onebot::{OneBotConfig, OneBotNotifier};
pub use store::{GroupStore, StoreError};
pub use sweep::{SweepStats, SweepSummary, Sweeper};
pub use switch::SwitchStore;

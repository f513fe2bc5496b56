//! apptrack — job-application tracking from inbox traffic.

pub mod classify;
pub mod config;
pub mod error;
pub mod ledger;
pub mod mailbox;
pub mod matcher;
pub mod normalize;
pub mod pipeline;
pub mod stage;
pub mod store;

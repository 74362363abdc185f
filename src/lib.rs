pub mod client;
pub mod config;
pub mod humanize;
pub mod messaging;
pub mod observability;
pub mod proto;
pub mod queue;
pub mod worker;

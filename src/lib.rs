//! SMS relay: accepts messages over HTTP, splits and encodes them into SMS
//! parts and submits them to MessageBird at a throttled rate. Also carries
//! the load generator used to exercise the relay.

pub mod config;
pub mod error;
pub mod gsm;
pub mod handlers;
pub mod loadgen;
pub mod provider;
pub mod queue;
pub mod server;
pub mod types;
pub mod validate;

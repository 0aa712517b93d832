//! # parley-client
//!
//! Client library for parley.
//!
//! This crate provides:
//! - Async TCP connection with a background reader task
//! - Typed API for every chat command
//! - A periodic poller for history, members and rooms

pub mod client;
pub mod connection;
pub mod error;
pub mod poller;

pub use client::Client;
pub use connection::{CommandSender, Connection, ConnectionConfig};
pub use error::ClientError;
pub use poller::{Poller, PollerConfig};

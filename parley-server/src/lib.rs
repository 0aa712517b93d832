//! # parley-server
//!
//! TCP server for parley.
//!
//! This crate provides:
//! - TCP listeners on any number of ports, sharing one room registry
//! - Per-connection sessions with a FIFO outbound queue
//! - The room registry: bounded history, broadcast and cursor-based polling
//! - YAML and environment configuration

pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError, NetworkConfig, RoomsConfig};
pub use error::{RegistryError, ServerError};
pub use registry::{ConnectionId, Deliver, RoomRegistry};
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{Outcome, Session, SessionState};

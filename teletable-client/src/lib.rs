//! # teletable-client
//!
//! Async TCP client for the teletable telemetry table.
//!
//! This crate provides:
//! - A client-local mirror of the server's entry namespace
//! - Handshake, keep-alive and reconnect handling
//! - Typed remote procedure calls against server-stored definitions
//! - A broadcast event stream of table and session changes

mod backoff;
mod conn;
mod registry;

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod table;

pub use client::Client;
pub use config::{BackoffConfig, ClientConfig};
pub use error::ClientError;
pub use events::SessionEvent;
pub use session::ConnectionState;
pub use table::{seq_newer, Entry, EntryTable};

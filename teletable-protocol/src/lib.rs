//! # teletable-protocol
//!
//! Wire protocol implementation for teletable, a publish/subscribe
//! telemetry table shared between one server and many clients.
//!
//! This crate provides:
//! - LEB128 and length-prefixed string primitives
//! - Typed entry value and RPC definition encodings
//! - The framed message set and an incremental streaming decoder

pub mod codec;
pub mod error;
pub mod message;
pub mod rpc;
pub mod value;
pub mod wire;

pub use codec::{try_decode, Decoder, Encoder};
pub use error::WireError;
pub use message::{EntryFlags, Message, NoRpcDefinitions, RpcDefinitions};
pub use rpc::{RpcDefinition, RpcParameter, RpcResult};
pub use value::{EntryType, EntryValue, MAX_ARRAY_LEN};

/// Protocol revision spoken by this implementation (major).
pub const PROTOCOL_MAJOR: u8 = 3;

/// Protocol revision spoken by this implementation (minor).
pub const PROTOCOL_MINOR: u8 = 0;

/// Default TCP port for table servers.
pub const DEFAULT_PORT: u16 = 1735;

/// Entry id of a client-proposed entry awaiting a server-assigned id.
pub const UNASSIGNED_ID: u16 = 0xFFFF;

/// Sentinel that must accompany a CLEAR_ALL_ENTRIES message.
pub const CLEAR_ALL_MAGIC: u32 = 0xD06C_B27A;

/// The only RPC definition version this implementation accepts.
pub const RPC_DEFINITION_VERSION: u8 = 0x01;

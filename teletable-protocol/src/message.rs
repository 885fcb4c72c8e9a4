//! Framed protocol messages.
//!
//! Every message is a single type byte followed by a type-specific body;
//! messages are self-delimiting and carry no outer length framing.

use crate::error::WireError;
use crate::rpc::RpcDefinition;
use crate::value::{EntryType, EntryValue};
use crate::wire::{put_string, put_varint, Reader};
use crate::{CLEAR_ALL_MAGIC, PROTOCOL_MAJOR, PROTOCOL_MINOR};
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

/// Wire tags for the message variants. Fixed by wire compatibility.
mod tag {
    pub const KEEP_ALIVE: u8 = 0x00;
    pub const CLIENT_HELLO: u8 = 0x01;
    pub const PROTO_VERSION_UNSUPPORTED: u8 = 0x02;
    pub const SERVER_HELLO_COMPLETE: u8 = 0x03;
    pub const SERVER_HELLO: u8 = 0x04;
    pub const CLIENT_HELLO_COMPLETE: u8 = 0x05;
    pub const ENTRY_ASSIGNMENT: u8 = 0x10;
    pub const ENTRY_UPDATE: u8 = 0x11;
    pub const ENTRY_FLAGS_UPDATE: u8 = 0x12;
    pub const ENTRY_DELETE: u8 = 0x13;
    pub const CLEAR_ALL_ENTRIES: u8 = 0x14;
    pub const RPC_EXECUTE: u8 = 0x20;
    pub const RPC_RESPONSE: u8 = 0x21;
}

/// Per-entry flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryFlags(u8);

impl EntryFlags {
    /// The entry survives server restarts.
    pub const PERSISTENT: u8 = 1 << 0;

    /// Bits defined in protocol revision 3.0; the rest are reserved.
    const VALID_MASK: u8 = 0x01;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn persistent() -> Self {
        Self(Self::PERSISTENT)
    }

    pub fn is_persistent(&self) -> bool {
        self.0 & Self::PERSISTENT != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Reserved bits are dropped on read.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::VALID_MASK)
    }
}

/// Lookup seam used to type RPC message bodies during decode.
///
/// RPC_EXECUTE and RPC_RESPONSE bodies carry no per-value type tags; the
/// decoder resolves the referenced definition to learn the value types.
pub trait RpcDefinitions {
    /// The definition stored under the given entry id, if any.
    fn rpc_definition(&self, id: u16) -> Option<&RpcDefinition>;
}

/// Lookup that knows no definitions (handshake-only contexts).
pub struct NoRpcDefinitions;

impl RpcDefinitions for NoRpcDefinitions {
    fn rpc_definition(&self, _id: u16) -> Option<&RpcDefinition> {
        None
    }
}

impl RpcDefinitions for HashMap<u16, RpcDefinition> {
    fn rpc_definition(&self, id: u16) -> Option<&RpcDefinition> {
        self.get(&id)
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    KeepAlive,
    ClientHello {
        major: u8,
        minor: u8,
        identity: String,
    },
    ProtoVersionUnsupported {
        major: u8,
        minor: u8,
    },
    ServerHelloComplete,
    ServerHello {
        previously_seen: bool,
        identity: String,
    },
    ClientHelloComplete,
    EntryAssignment {
        name: String,
        entry_type: EntryType,
        id: u16,
        seq: u16,
        flags: EntryFlags,
        value: EntryValue,
    },
    EntryUpdate {
        id: u16,
        seq: u16,
        entry_type: EntryType,
        value: EntryValue,
    },
    EntryFlagsUpdate {
        id: u16,
        flags: EntryFlags,
    },
    EntryDelete {
        id: u16,
    },
    ClearAllEntries,
    RpcExecute {
        definition_id: u16,
        unique_id: u16,
        parameters: Vec<EntryValue>,
    },
    RpcResponse {
        definition_id: u16,
        unique_id: u16,
        results: Vec<EntryValue>,
    },
}

impl Message {
    /// A CLIENT_HELLO for the protocol revision this crate speaks.
    pub fn client_hello(identity: impl Into<String>) -> Self {
        Message::ClientHello {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            identity: identity.into(),
        }
    }

    /// The wire tag of this message.
    pub fn type_byte(&self) -> u8 {
        match self {
            Message::KeepAlive => tag::KEEP_ALIVE,
            Message::ClientHello { .. } => tag::CLIENT_HELLO,
            Message::ProtoVersionUnsupported { .. } => tag::PROTO_VERSION_UNSUPPORTED,
            Message::ServerHelloComplete => tag::SERVER_HELLO_COMPLETE,
            Message::ServerHello { .. } => tag::SERVER_HELLO,
            Message::ClientHelloComplete => tag::CLIENT_HELLO_COMPLETE,
            Message::EntryAssignment { .. } => tag::ENTRY_ASSIGNMENT,
            Message::EntryUpdate { .. } => tag::ENTRY_UPDATE,
            Message::EntryFlagsUpdate { .. } => tag::ENTRY_FLAGS_UPDATE,
            Message::EntryDelete { .. } => tag::ENTRY_DELETE,
            Message::ClearAllEntries => tag::CLEAR_ALL_ENTRIES,
            Message::RpcExecute { .. } => tag::RPC_EXECUTE,
            Message::RpcResponse { .. } => tag::RPC_RESPONSE,
        }
    }

    /// Appends the framed encoding of this message to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u8(self.type_byte());
        match self {
            Message::KeepAlive | Message::ServerHelloComplete | Message::ClientHelloComplete => {}
            Message::ClearAllEntries => buf.put_u32(CLEAR_ALL_MAGIC),
            Message::ClientHello {
                major,
                minor,
                identity,
            } => {
                buf.put_u8(*major);
                buf.put_u8(*minor);
                put_string(buf, identity);
            }
            Message::ProtoVersionUnsupported { major, minor } => {
                buf.put_u8(*major);
                buf.put_u8(*minor);
            }
            Message::ServerHello {
                previously_seen,
                identity,
            } => {
                buf.put_u8(u8::from(*previously_seen));
                put_string(buf, identity);
            }
            Message::EntryAssignment {
                name,
                entry_type,
                id,
                seq,
                flags,
                value,
            } => {
                put_string(buf, name);
                buf.put_u8(entry_type.byte());
                buf.put_u16(*id);
                buf.put_u16(*seq);
                buf.put_u8(flags.bits());
                value.encode(*entry_type, buf)?;
            }
            Message::EntryUpdate {
                id,
                seq,
                entry_type,
                value,
            } => {
                buf.put_u16(*id);
                buf.put_u16(*seq);
                buf.put_u8(entry_type.byte());
                value.encode(*entry_type, buf)?;
            }
            Message::EntryFlagsUpdate { id, flags } => {
                buf.put_u16(*id);
                buf.put_u8(flags.bits());
            }
            Message::EntryDelete { id } => buf.put_u16(*id),
            Message::RpcExecute {
                definition_id,
                unique_id,
                parameters,
            } => encode_rpc_body(buf, *definition_id, *unique_id, parameters)?,
            Message::RpcResponse {
                definition_id,
                unique_id,
                results,
            } => encode_rpc_body(buf, *definition_id, *unique_id, results)?,
        }
        Ok(())
    }

    /// Parses one message starting at the reader's cursor.
    pub fn decode(
        reader: &mut Reader<'_>,
        definitions: &dyn RpcDefinitions,
    ) -> Result<Self, WireError> {
        match reader.u8()? {
            tag::KEEP_ALIVE => Ok(Message::KeepAlive),
            tag::CLIENT_HELLO => {
                let major = reader.u8()?;
                let minor = reader.u8()?;
                let identity = reader.string()?;
                Ok(Message::ClientHello {
                    major,
                    minor,
                    identity,
                })
            }
            tag::PROTO_VERSION_UNSUPPORTED => {
                let major = reader.u8()?;
                let minor = reader.u8()?;
                Ok(Message::ProtoVersionUnsupported { major, minor })
            }
            tag::SERVER_HELLO_COMPLETE => Ok(Message::ServerHelloComplete),
            tag::SERVER_HELLO => {
                let flags = reader.u8()?;
                let identity = reader.string()?;
                Ok(Message::ServerHello {
                    previously_seen: flags & 0x01 != 0,
                    identity,
                })
            }
            tag::CLIENT_HELLO_COMPLETE => Ok(Message::ClientHelloComplete),
            tag::ENTRY_ASSIGNMENT => {
                let name = reader.string()?;
                let entry_type = EntryType::from_byte(reader.u8()?)?;
                let id = reader.u16_be()?;
                let seq = reader.u16_be()?;
                let flags = EntryFlags::from_bits(reader.u8()?);
                let value = EntryValue::decode(entry_type, reader)?;
                Ok(Message::EntryAssignment {
                    name,
                    entry_type,
                    id,
                    seq,
                    flags,
                    value,
                })
            }
            tag::ENTRY_UPDATE => {
                let id = reader.u16_be()?;
                let seq = reader.u16_be()?;
                let entry_type = EntryType::from_byte(reader.u8()?)?;
                let value = EntryValue::decode(entry_type, reader)?;
                Ok(Message::EntryUpdate {
                    id,
                    seq,
                    entry_type,
                    value,
                })
            }
            tag::ENTRY_FLAGS_UPDATE => {
                let id = reader.u16_be()?;
                let flags = EntryFlags::from_bits(reader.u8()?);
                Ok(Message::EntryFlagsUpdate { id, flags })
            }
            tag::ENTRY_DELETE => {
                let id = reader.u16_be()?;
                Ok(Message::EntryDelete { id })
            }
            tag::CLEAR_ALL_ENTRIES => {
                let magic = reader.u32_be()?;
                if magic != CLEAR_ALL_MAGIC {
                    return Err(WireError::InvalidMagic(magic));
                }
                Ok(Message::ClearAllEntries)
            }
            tag::RPC_EXECUTE => {
                let (definition_id, unique_id, parameters) =
                    decode_rpc_body(reader, definitions, RpcBody::Parameters)?;
                Ok(Message::RpcExecute {
                    definition_id,
                    unique_id,
                    parameters,
                })
            }
            tag::RPC_RESPONSE => {
                let (definition_id, unique_id, results) =
                    decode_rpc_body(reader, definitions, RpcBody::Results)?;
                Ok(Message::RpcResponse {
                    definition_id,
                    unique_id,
                    results,
                })
            }
            other => Err(WireError::InvalidMessageType(other)),
        }
    }
}

enum RpcBody {
    Parameters,
    Results,
}

fn encode_rpc_body(
    buf: &mut BytesMut,
    definition_id: u16,
    unique_id: u16,
    values: &[EntryValue],
) -> Result<(), WireError> {
    buf.put_u16(definition_id);
    buf.put_u16(unique_id);
    put_varint(buf, values.len() as u64);
    for value in values {
        value.encode(value.entry_type(), buf)?;
    }
    Ok(())
}

fn decode_rpc_body(
    reader: &mut Reader<'_>,
    definitions: &dyn RpcDefinitions,
    body: RpcBody,
) -> Result<(u16, u16, Vec<EntryValue>), WireError> {
    let definition_id = reader.u16_be()?;
    let unique_id = reader.u16_be()?;
    let count = reader.varint()? as usize;

    let definition = definitions
        .rpc_definition(definition_id)
        .ok_or(WireError::UnknownRpcDefinition(definition_id))?;
    let types = match body {
        RpcBody::Parameters => definition.parameter_types(),
        RpcBody::Results => definition.result_types(),
    };
    if count != types.len() {
        return Err(WireError::RpcArityMismatch {
            definition: definition_id,
            expected: types.len(),
            actual: count,
        });
    }

    let mut values = Vec::with_capacity(count);
    for entry_type in types {
        values.push(EntryValue::decode(entry_type, reader)?);
    }
    Ok((definition_id, unique_id, values))
}

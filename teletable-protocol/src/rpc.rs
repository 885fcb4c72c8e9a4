//! RPC definition grammar.
//!
//! A procedure signature is stored in the table as an ordinary entry
//! value. The serialized block is:
//!
//! ```text
//! u8 version (0x01)
//! length-prefixed procedure name
//! u8 parameter count, then per parameter:
//!     u8 type, length-prefixed name, default value of that type
//! u8 result count, then per result:
//!     u8 type, length-prefixed name
//! ```
//!
//! Result specs carry no default value on the wire.

use crate::error::WireError;
use crate::value::{EntryType, EntryValue};
use crate::wire::{put_string, Reader};
use crate::RPC_DEFINITION_VERSION;
use bytes::{BufMut, BytesMut};

/// One declared parameter of a procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcParameter {
    pub param_type: EntryType,
    pub name: String,
    /// Value used when the caller omits the parameter.
    pub default: EntryValue,
}

/// One declared result of a procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResult {
    pub result_type: EntryType,
    pub name: String,
}

/// A server-defined procedure signature.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcDefinition {
    pub name: String,
    pub parameters: Vec<RpcParameter>,
    pub results: Vec<RpcResult>,
}

impl RpcDefinition {
    /// Serializes the definition block (without the outer length prefix).
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u8(RPC_DEFINITION_VERSION);
        put_string(buf, &self.name);

        buf.put_u8(spec_count(self.parameters.len())?);
        for parameter in &self.parameters {
            check_spec_type(parameter.param_type)?;
            buf.put_u8(parameter.param_type.byte());
            put_string(buf, &parameter.name);
            parameter.default.encode(parameter.param_type, buf)?;
        }

        buf.put_u8(spec_count(self.results.len())?);
        for result in &self.results {
            check_spec_type(result.result_type)?;
            buf.put_u8(result.result_type.byte());
            put_string(buf, &result.name);
        }
        Ok(())
    }

    /// Parses a definition block.
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        let version = reader.u8()?;
        if version != RPC_DEFINITION_VERSION {
            return Err(WireError::UnsupportedRpcVersion(version));
        }
        let name = reader.string()?;

        let parameter_count = reader.u8()?;
        let mut parameters = Vec::with_capacity(parameter_count as usize);
        for _ in 0..parameter_count {
            let param_type = decode_spec_type(reader)?;
            let name = reader.string()?;
            let default = EntryValue::decode(param_type, reader)?;
            parameters.push(RpcParameter {
                param_type,
                name,
                default,
            });
        }

        let result_count = reader.u8()?;
        let mut results = Vec::with_capacity(result_count as usize);
        for _ in 0..result_count {
            let result_type = decode_spec_type(reader)?;
            let name = reader.string()?;
            results.push(RpcResult { result_type, name });
        }

        Ok(Self {
            name,
            parameters,
            results,
        })
    }

    /// Parameter types in declaration order.
    pub fn parameter_types(&self) -> Vec<EntryType> {
        self.parameters.iter().map(|p| p.param_type).collect()
    }

    /// Result types in declaration order.
    pub fn result_types(&self) -> Vec<EntryType> {
        self.results.iter().map(|r| r.result_type).collect()
    }
}

fn decode_spec_type(reader: &mut Reader<'_>) -> Result<EntryType, WireError> {
    let entry_type = EntryType::from_byte(reader.u8()?)?;
    check_spec_type(entry_type)?;
    Ok(entry_type)
}

// Definitions nest entry values one level deep only: a parameter or
// result cannot itself be RPC-typed.
fn check_spec_type(entry_type: EntryType) -> Result<(), WireError> {
    if entry_type == EntryType::Rpc {
        return Err(WireError::InvalidType(entry_type.byte()));
    }
    Ok(())
}

fn spec_count(len: usize) -> Result<u8, WireError> {
    u8::try_from(len).map_err(|_| WireError::Malformed("more than 255 specs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_definition() -> RpcDefinition {
        RpcDefinition {
            name: "drive/set_speed".into(),
            parameters: vec![
                RpcParameter {
                    param_type: EntryType::Double,
                    name: "left".into(),
                    default: EntryValue::Double(0.0),
                },
                RpcParameter {
                    param_type: EntryType::Double,
                    name: "right".into(),
                    default: EntryValue::Double(0.0),
                },
            ],
            results: vec![RpcResult {
                result_type: EntryType::Boolean,
                name: "applied".into(),
            }],
        }
    }

    fn encode(definition: &RpcDefinition) -> BytesMut {
        let mut buf = BytesMut::new();
        definition.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_definition_roundtrip() {
        let definition = sample_definition();
        let buf = encode(&definition);
        let mut reader = Reader::new(&buf);
        let decoded = RpcDefinition::decode(&mut reader).unwrap();
        assert_eq!(decoded, definition);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_empty_definition_roundtrip() {
        let definition = RpcDefinition {
            name: "noop".into(),
            parameters: vec![],
            results: vec![],
        };
        let buf = encode(&definition);
        let mut reader = Reader::new(&buf);
        assert_eq!(RpcDefinition::decode(&mut reader).unwrap(), definition);
    }

    #[test]
    fn test_version_byte_is_checked() {
        let mut buf = encode(&sample_definition());
        buf[0] = 0x02;
        let mut reader = Reader::new(&buf);
        assert_eq!(
            RpcDefinition::decode(&mut reader),
            Err(WireError::UnsupportedRpcVersion(0x02))
        );
    }

    #[test]
    fn test_rpc_typed_parameter_rejected() {
        let definition = RpcDefinition {
            name: "bad".into(),
            parameters: vec![RpcParameter {
                param_type: EntryType::Rpc,
                name: "inner".into(),
                default: EntryValue::Boolean(false),
            }],
            results: vec![],
        };
        let mut buf = BytesMut::new();
        assert_eq!(
            definition.encode(&mut buf),
            Err(WireError::InvalidType(EntryType::Rpc.byte()))
        );
    }

    #[test]
    fn test_results_carry_no_default() {
        let definition = RpcDefinition {
            name: "f".into(),
            parameters: vec![],
            results: vec![RpcResult {
                result_type: EntryType::Double,
                name: "out".into(),
            }],
        };
        let buf = encode(&definition);
        // version, name("f"), param count 0, result count 1,
        // result type byte, result name("out") -- and nothing after.
        let expected = vec![
            0x01, 0x01, b'f', 0x00, 0x01, 0x01, 0x03, b'o', b'u', b't',
        ];
        assert_eq!(buf.to_vec(), expected);
    }

    #[test]
    fn test_type_accessors() {
        let definition = sample_definition();
        assert_eq!(
            definition.parameter_types(),
            vec![EntryType::Double, EntryType::Double]
        );
        assert_eq!(definition.result_types(), vec![EntryType::Boolean]);
    }
}

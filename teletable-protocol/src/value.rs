//! Typed entry values and their binary encodings.
//!
//! Value layout by type:
//!
//! ```text
//! BOOLEAN        1 byte, 0x00 or 0x01
//! DOUBLE         8 bytes, IEEE-754 binary64 big-endian
//! STRING         LEB128 byte length || UTF-8 bytes
//! RAW            LEB128 byte length || raw bytes
//! BOOLEAN_ARRAY  u8 count || count boolean bytes
//! DOUBLE_ARRAY   u8 count || count * 8 bytes
//! STRING_ARRAY   u8 count || count length-prefixed strings
//! RPC            LEB128 byte length || serialized definition block
//! ```

use crate::error::WireError;
use crate::rpc::RpcDefinition;
use crate::wire::{put_string, put_varint, Reader};
use bytes::{BufMut, Bytes, BytesMut};

/// Largest element count an array value can carry on the wire.
pub const MAX_ARRAY_LEN: usize = 255;

/// The eight entry types and their wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryType {
    Boolean = 0x00,
    Double = 0x01,
    String = 0x02,
    Raw = 0x03,
    BooleanArray = 0x10,
    DoubleArray = 0x11,
    StringArray = 0x12,
    Rpc = 0x20,
}

impl EntryType {
    /// Parses a wire tag.
    pub fn from_byte(byte: u8) -> Result<Self, WireError> {
        match byte {
            0x00 => Ok(EntryType::Boolean),
            0x01 => Ok(EntryType::Double),
            0x02 => Ok(EntryType::String),
            0x03 => Ok(EntryType::Raw),
            0x10 => Ok(EntryType::BooleanArray),
            0x11 => Ok(EntryType::DoubleArray),
            0x12 => Ok(EntryType::StringArray),
            0x20 => Ok(EntryType::Rpc),
            other => Err(WireError::InvalidType(other)),
        }
    }

    /// The wire tag for this type.
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// A single typed value in the shared namespace.
///
/// The RPC arm owns its definition on the heap; definitions embed further
/// entry values as parameter defaults, which keeps the type recursive one
/// level deep.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryValue {
    Boolean(bool),
    Double(f64),
    String(String),
    Raw(Bytes),
    BooleanArray(Vec<bool>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
    Rpc(Box<RpcDefinition>),
}

impl EntryValue {
    /// The entry type this value inhabits.
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryValue::Boolean(_) => EntryType::Boolean,
            EntryValue::Double(_) => EntryType::Double,
            EntryValue::String(_) => EntryType::String,
            EntryValue::Raw(_) => EntryType::Raw,
            EntryValue::BooleanArray(_) => EntryType::BooleanArray,
            EntryValue::DoubleArray(_) => EntryType::DoubleArray,
            EntryValue::StringArray(_) => EntryType::StringArray,
            EntryValue::Rpc(_) => EntryType::Rpc,
        }
    }

    /// Encodes the value as the payload of an entry declared with `declared`.
    pub fn encode(&self, declared: EntryType, buf: &mut BytesMut) -> Result<(), WireError> {
        if self.entry_type() != declared {
            return Err(WireError::TypeMismatch { expected: declared });
        }
        match self {
            EntryValue::Boolean(value) => buf.put_u8(u8::from(*value)),
            EntryValue::Double(value) => buf.put_f64(*value),
            EntryValue::String(value) => put_string(buf, value),
            EntryValue::Raw(data) => {
                put_varint(buf, data.len() as u64);
                buf.put_slice(data);
            }
            EntryValue::BooleanArray(items) => {
                buf.put_u8(array_len(items.len())?);
                for item in items {
                    buf.put_u8(u8::from(*item));
                }
            }
            EntryValue::DoubleArray(items) => {
                buf.put_u8(array_len(items.len())?);
                for item in items {
                    buf.put_f64(*item);
                }
            }
            EntryValue::StringArray(items) => {
                buf.put_u8(array_len(items.len())?);
                for item in items {
                    put_string(buf, item);
                }
            }
            EntryValue::Rpc(definition) => {
                let mut block = BytesMut::new();
                definition.encode(&mut block)?;
                put_varint(buf, block.len() as u64);
                buf.put_slice(&block);
            }
        }
        Ok(())
    }

    /// Decodes the payload of an entry of the given (already validated) type.
    pub fn decode(entry_type: EntryType, reader: &mut Reader<'_>) -> Result<Self, WireError> {
        match entry_type {
            EntryType::Boolean => Ok(EntryValue::Boolean(decode_bool(reader)?)),
            EntryType::Double => Ok(EntryValue::Double(reader.f64_be()?)),
            EntryType::String => Ok(EntryValue::String(reader.string()?)),
            EntryType::Raw => Ok(EntryValue::Raw(Bytes::copy_from_slice(
                reader.length_prefixed()?,
            ))),
            EntryType::BooleanArray => {
                let count = reader.u8()? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(decode_bool(reader)?);
                }
                Ok(EntryValue::BooleanArray(items))
            }
            EntryType::DoubleArray => {
                let count = reader.u8()? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(reader.f64_be()?);
                }
                Ok(EntryValue::DoubleArray(items))
            }
            EntryType::StringArray => {
                let count = reader.u8()? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(reader.string()?);
                }
                Ok(EntryValue::StringArray(items))
            }
            EntryType::Rpc => {
                let block = reader.length_prefixed()?;
                let mut inner = Reader::new(block);
                let definition = RpcDefinition::decode(&mut inner).map_err(|err| match err {
                    // The length prefix promised a complete block.
                    WireError::Truncated => {
                        WireError::Malformed("rpc definition shorter than its length prefix")
                    }
                    other => other,
                })?;
                if inner.remaining() != 0 {
                    return Err(WireError::Malformed(
                        "rpc definition longer than its length prefix",
                    ));
                }
                Ok(EntryValue::Rpc(Box::new(definition)))
            }
        }
    }
}

fn decode_bool(reader: &mut Reader<'_>) -> Result<bool, WireError> {
    match reader.u8()? {
        0x00 => Ok(false),
        0x01 => Ok(true),
        _ => Err(WireError::Malformed("boolean byte")),
    }
}

fn array_len(len: usize) -> Result<u8, WireError> {
    u8::try_from(len).map_err(|_| WireError::Malformed("array longer than 255 elements"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{RpcParameter, RpcResult};

    fn roundtrip(value: &EntryValue) -> EntryValue {
        let mut buf = BytesMut::new();
        value.encode(value.entry_type(), &mut buf).unwrap();
        let mut reader = Reader::new(&buf);
        let decoded = EntryValue::decode(value.entry_type(), &mut reader).unwrap();
        assert_eq!(reader.remaining(), 0);
        decoded
    }

    #[test]
    fn test_type_byte_roundtrip() {
        for byte in [0x00, 0x01, 0x02, 0x03, 0x10, 0x11, 0x12, 0x20] {
            assert_eq!(EntryType::from_byte(byte).unwrap().byte(), byte);
        }
        assert_eq!(EntryType::from_byte(0x04), Err(WireError::InvalidType(0x04)));
        assert_eq!(EntryType::from_byte(0xFF), Err(WireError::InvalidType(0xFF)));
    }

    #[test]
    fn test_boolean_encoding() {
        let mut buf = BytesMut::new();
        EntryValue::Boolean(true)
            .encode(EntryType::Boolean, &mut buf)
            .unwrap();
        assert_eq!(buf.to_vec(), vec![0x01]);

        let mut reader = Reader::new(&[0x00]);
        assert_eq!(
            EntryValue::decode(EntryType::Boolean, &mut reader).unwrap(),
            EntryValue::Boolean(false)
        );
    }

    #[test]
    fn test_boolean_rejects_other_bytes() {
        let mut reader = Reader::new(&[0x02]);
        assert!(matches!(
            EntryValue::decode(EntryType::Boolean, &mut reader),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn test_double_array_wire_shape() {
        let mut buf = BytesMut::new();
        EntryValue::DoubleArray(vec![1.0, 2.0])
            .encode(EntryType::DoubleArray, &mut buf)
            .unwrap();

        let mut expected = vec![0x02];
        expected.extend_from_slice(&1.0f64.to_be_bytes());
        expected.extend_from_slice(&2.0f64.to_be_bytes());
        assert_eq!(buf.to_vec(), expected);
        assert_eq!(buf.len(), 17);
    }

    #[test]
    fn test_scalar_roundtrips() {
        assert_eq!(
            roundtrip(&EntryValue::Double(-0.25)),
            EntryValue::Double(-0.25)
        );
        assert_eq!(
            roundtrip(&EntryValue::String("dashboard/x".into())),
            EntryValue::String("dashboard/x".into())
        );
        assert_eq!(
            roundtrip(&EntryValue::Raw(Bytes::from_static(b"\x00\x01\xFF"))),
            EntryValue::Raw(Bytes::from_static(b"\x00\x01\xFF"))
        );
    }

    #[test]
    fn test_array_roundtrips() {
        assert_eq!(
            roundtrip(&EntryValue::BooleanArray(vec![true, false, true])),
            EntryValue::BooleanArray(vec![true, false, true])
        );
        assert_eq!(
            roundtrip(&EntryValue::StringArray(vec!["a".into(), "".into()])),
            EntryValue::StringArray(vec!["a".into(), "".into()])
        );
        assert_eq!(
            roundtrip(&EntryValue::DoubleArray(vec![])),
            EntryValue::DoubleArray(vec![])
        );
    }

    #[test]
    fn test_encode_type_mismatch() {
        let mut buf = BytesMut::new();
        let err = EntryValue::Boolean(true)
            .encode(EntryType::Double, &mut buf)
            .unwrap_err();
        assert_eq!(
            err,
            WireError::TypeMismatch {
                expected: EntryType::Double
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_array_over_255_rejected() {
        let mut buf = BytesMut::new();
        let err = EntryValue::BooleanArray(vec![false; 256])
            .encode(EntryType::BooleanArray, &mut buf)
            .unwrap_err();
        assert!(matches!(err, WireError::Malformed(_)));
    }

    #[test]
    fn test_rpc_value_roundtrip_with_string_default() {
        let definition = RpcDefinition {
            name: "arm/move".into(),
            parameters: vec![RpcParameter {
                param_type: EntryType::String,
                name: "preset".into(),
                default: EntryValue::String("stowed".into()),
            }],
            results: vec![RpcResult {
                result_type: EntryType::Boolean,
                name: "ok".into(),
            }],
        };
        let value = EntryValue::Rpc(Box::new(definition));
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn test_rpc_value_length_prefix_must_be_exact() {
        let definition = RpcDefinition {
            name: "f".into(),
            parameters: vec![],
            results: vec![],
        };
        let mut buf = BytesMut::new();
        EntryValue::Rpc(Box::new(definition))
            .encode(EntryType::Rpc, &mut buf)
            .unwrap();

        // One spare byte inside the declared block length.
        let mut padded = buf.to_vec();
        padded[0] += 1;
        padded.push(0x00);
        let mut reader = Reader::new(&padded);
        assert!(matches!(
            EntryValue::decode(EntryType::Rpc, &mut reader),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_array_is_recoverable() {
        // Count says 2 doubles, only one present.
        let mut bytes = vec![0x02];
        bytes.extend_from_slice(&1.0f64.to_be_bytes());
        let mut reader = Reader::new(&bytes);
        assert_eq!(
            EntryValue::decode(EntryType::DoubleArray, &mut reader),
            Err(WireError::Truncated)
        );
    }
}

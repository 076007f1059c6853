//! Value serializers for keys and messages.
//!
//! Both ends of a queue must use the same format. Encodings must be
//! deterministic so that equal keys compare equal after a round trip.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SerializationError;

/// Turns keys and messages into bytes and back.
pub trait Serializer: Send + Sync + 'static {
    /// Short format name used in errors and logs.
    fn format(&self) -> &'static str;

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializationError>;

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError>;
}

/// UTF-8 JSON via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn format(&self) -> &'static str {
        "json"
    }

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(value).map_err(|e| SerializationError::Encode {
            format: self.format(),
            message: e.to_string(),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::Decode {
            format: self.format(),
            message: e.to_string(),
        })
    }
}

/// Compact binary CBOR via ciborium.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborSerializer;

impl Serializer for CborSerializer {
    fn format(&self) -> &'static str {
        "cbor"
    }

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        let mut out = Vec::new();
        ciborium::into_writer(value, &mut out).map_err(|e| SerializationError::Encode {
            format: self.format(),
            message: e.to_string(),
        })?;
        Ok(out)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        ciborium::from_reader(bytes).map_err(|e| SerializationError::Decode {
            format: self.format(),
            message: e.to_string(),
        })
    }
}

/// MessagePack via rmp-serde.
///
/// Structs are written as maps keyed by field name, so peers built from
/// different struct definitions with matching field names interoperate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackSerializer;

impl Serializer for MessagePackSerializer {
    fn format(&self) -> &'static str {
        "msgpack"
    }

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        rmp_serde::to_vec_named(value).map_err(|e| SerializationError::Encode {
            format: self.format(),
            message: e.to_string(),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        rmp_serde::from_slice(bytes).map_err(|e| SerializationError::Decode {
            format: self.format(),
            message: e.to_string(),
        })
    }
}

/// Serializer selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    #[default]
    #[serde(rename = "msgpack")]
    MessagePack,
    Json,
    Cbor,
}

/// Runtime choice between the built-in serializers.
#[derive(Debug, Clone, Copy)]
pub enum ConfiguredSerializer {
    MessagePack(MessagePackSerializer),
    Json(JsonSerializer),
    Cbor(CborSerializer),
}

impl From<SerializerKind> for ConfiguredSerializer {
    fn from(kind: SerializerKind) -> Self {
        match kind {
            SerializerKind::MessagePack => Self::MessagePack(MessagePackSerializer),
            SerializerKind::Json => Self::Json(JsonSerializer),
            SerializerKind::Cbor => Self::Cbor(CborSerializer),
        }
    }
}

impl Serializer for ConfiguredSerializer {
    fn format(&self) -> &'static str {
        match self {
            Self::MessagePack(inner) => inner.format(),
            Self::Json(inner) => inner.format(),
            Self::Cbor(inner) => inner.format(),
        }
    }

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        match self {
            Self::MessagePack(inner) => inner.serialize(value),
            Self::Json(inner) => inner.serialize(value),
            Self::Cbor(inner) => inner.serialize(value),
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        match self {
            Self::MessagePack(inner) => inner.deserialize(bytes),
            Self::Json(inner) => inner.deserialize(bytes),
            Self::Cbor(inner) => inner.deserialize(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct SensorKey {
        id: u32,
        zone: String,
    }

    #[test]
    fn test_json_composite_key() {
        let key = SensorKey {
            id: 100,
            zone: "100".to_string(),
        };
        let bytes = JsonSerializer.serialize(&key).unwrap();
        assert_eq!(bytes, br#"{"id":100,"zone":"100"}"#);
        let back: SensorKey = JsonSerializer.deserialize(&bytes).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_cbor_is_smaller_than_json() {
        let value = vec![1u32, 2, 3, 4, 5, 6, 7, 8];
        let cbor = CborSerializer.serialize(&value).unwrap();
        let json = JsonSerializer.serialize(&value).unwrap();
        assert!(cbor.len() < json.len());
        let back: Vec<u32> = CborSerializer.deserialize(&cbor).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_msgpack_composite_key() {
        let key = SensorKey {
            id: 100,
            zone: "100".to_string(),
        };
        let bytes = MessagePackSerializer.serialize(&key).unwrap();
        // fixmap of two entries, field names included
        assert_eq!(bytes[0], 0x82);
        assert_eq!(bytes, MessagePackSerializer.serialize(&key).unwrap());
        let back: SensorKey = MessagePackSerializer.deserialize(&bytes).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_default_kind_is_msgpack() {
        let serializer = ConfiguredSerializer::from(SerializerKind::default());
        assert_eq!(serializer.format(), "msgpack");
        let bytes = serializer.serialize("Foo").unwrap();
        assert_eq!(bytes, [0xa3, b'F', b'o', b'o']);
        assert_eq!(serializer.deserialize::<String>(&bytes).unwrap(), "Foo");
    }

    #[test]
    fn test_decode_error_names_format() {
        let err = JsonSerializer.deserialize::<String>(b"\xff").unwrap_err();
        assert!(err.to_string().starts_with("json decode failed"));

        let err = ConfiguredSerializer::from(SerializerKind::Cbor)
            .deserialize::<String>(b"")
            .unwrap_err();
        assert!(err.to_string().starts_with("cbor decode failed"));

        let err = MessagePackSerializer.deserialize::<String>(b"\xc1").unwrap_err();
        assert!(err.to_string().starts_with("msgpack decode failed"));
    }
}

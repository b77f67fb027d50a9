//! Entity serialization for the distributed cache.

use serde::{de::DeserializeOwned, Serialize};
use triad_core::CodecError;

/// Converts entities to and from the bytes held by the distributed cache.
///
/// Every coordinator sharing a cache must use the same codec.
pub trait Codec: Send + Sync {
    fn encode<E: Serialize>(&self, entity: &E) -> Result<Vec<u8>, CodecError>;

    fn decode<E: DeserializeOwned>(&self, bytes: &[u8]) -> Result<E, CodecError>;
}

/// JSON codec using `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<E: Serialize>(&self, entity: &E) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(entity).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
    }

    fn decode<E: DeserializeOwned>(&self, bytes: &[u8]) -> Result<E, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            reason: e.to_string(),
        })
    }
}

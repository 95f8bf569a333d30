//! Payload encoding for arguments, results and streamed values
//!
//! Payloads are JSON documents. The envelope framing around them is binary,
//! but values stay self-describing so stream filters can read named fields
//! and deltas can be computed structurally without knowing the Rust type.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a value as a payload
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| CodecError::encoding(std::any::type_name::<T>(), e))
}

/// Decode a payload into a typed value
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| CodecError::decoding(std::any::type_name::<T>(), e))
}

/// Decode a payload without committing to a type
pub fn decode_document(bytes: &[u8]) -> CodecResult<serde_json::Value> {
    decode_value(bytes)
}

/// Ordered, individually encoded call arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    values: Vec<Vec<u8>>,
}

impl Arguments {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_raw(values: Vec<Vec<u8>>) -> Self {
        Self { values }
    }

    /// Append one encoded argument
    pub fn with<T: Serialize + ?Sized>(mut self, value: &T) -> CodecResult<Self> {
        self.values.push(encode_value(value)?);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn raw(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index).map(Vec::as_slice)
    }

    /// Decode the argument at `index`
    pub fn decode<T: DeserializeOwned>(&self, index: usize) -> CodecResult<T> {
        let raw = self.values.get(index).ok_or(CodecError::MissingArgument {
            index,
            supplied: self.values.len(),
        })?;
        serde_json::from_slice(raw).map_err(|e| {
            CodecError::decoding(
                format!("argument {} as {}", index, std::any::type_name::<T>()),
                e,
            )
        })
    }

    /// Total encoded size, used by payload validators
    pub fn encoded_size(&self) -> usize {
        self.values.iter().map(Vec::len).sum()
    }

    pub fn into_inner(self) -> Vec<Vec<u8>> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    #[test]
    fn test_arguments_positional_decode() {
        let args = Arguments::empty()
            .with(&5u32)
            .unwrap()
            .with(&Point { x: 1, y: 2 })
            .unwrap();

        assert_eq!(args.len(), 2);
        assert_eq!(args.decode::<u32>(0).unwrap(), 5);
        assert_eq!(args.decode::<Point>(1).unwrap(), Point { x: 1, y: 2 });
    }

    #[test]
    fn test_missing_argument_reports_index() {
        let args = Arguments::empty();
        let err = args.decode::<u32>(0).unwrap_err();
        assert_eq!(
            err,
            CodecError::MissingArgument {
                index: 0,
                supplied: 0
            }
        );
    }

    #[test]
    fn test_type_mismatch_is_decoding_error() {
        let args = Arguments::empty().with("not a number").unwrap();
        let err = args.decode::<u64>(0).unwrap_err();
        assert!(matches!(err, CodecError::Decoding { .. }));
    }
}

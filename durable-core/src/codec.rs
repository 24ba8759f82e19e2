use anyhow::Result;
use bytes::Bytes;

/// Sealed helper traits for codec implementations.
///
/// A codec declares which payload types it supports by implementing
/// `sealed::EncodeValue<T>` / `sealed::DecodeValue<T>` with its own bounds,
/// and an empty `Encoder` / `Decoder` impl.
pub mod sealed {
    use super::*;

    pub trait EncodeValue<T>: Send + Sync + 'static {
        fn encode_value(&self, value: &T) -> Result<Bytes>;
    }

    pub trait DecodeValue<T>: Send + Sync + 'static {
        fn decode_value(&self, bytes: Bytes) -> Result<T>;
    }
}

/// Serializes step arguments, step results and workflow outputs.
pub trait Encoder: Send + Sync + 'static {
    fn encode<T>(&self, value: &T) -> Result<Bytes>
    where
        Self: sealed::EncodeValue<T>,
    {
        sealed::EncodeValue::encode_value(self, value)
    }
}

/// Deserializes workflow arguments and step results.
pub trait Decoder: Send + Sync + 'static {
    fn decode<T>(&self, bytes: Bytes) -> Result<T>
    where
        Self: sealed::DecodeValue<T>,
    {
        sealed::DecodeValue::decode_value(self, bytes)
    }
}

pub trait Codec: Encoder + Decoder {}

impl<U> Codec for U where U: Encoder + Decoder {}

use crate::codec::{Decoder, Encoder, sealed};
use anyhow::Result;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Payload codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Encoder for JsonCodec {}
impl Decoder for JsonCodec {}

impl<T> sealed::EncodeValue<T> for JsonCodec
where
    T: Serialize,
{
    fn encode_value(&self, value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }
}

impl<T> sealed::DecodeValue<T> for JsonCodec
where
    T: DeserializeOwned,
{
    fn decode_value(&self, bytes: Bytes) -> Result<T> {
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        sku: String,
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec;
        let order = Order {
            id: 7,
            sku: "tea".to_string(),
        };
        let bytes = codec.encode(&order).unwrap();
        assert_eq!(&bytes[..], br#"{"id":7,"sku":"tea"}"#);
        let decoded: Order = codec.decode(bytes).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let result: Result<Order> = JsonCodec.decode(Bytes::from_static(b"not json"));
        assert!(result.is_err());
    }
}

//! MsgPack codec using `rmp-serde`.
//!
//! **Always** encodes with `to_vec_named`: structs travel as maps with field
//! names, which is what non-Rust MessagePack peers expect. `to_vec` would
//! encode them as positional arrays.
//!
//! # Example
//!
//! ```
//! use sockwire::codec::{Codec, MsgPackCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let codec = MsgPackCodec::<Message, Message>::new();
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let (encoded, _) = codec.serialize(&msg);
//! let decoded = codec.deserialize(&encoded).unwrap().unwrap();
//! assert_eq!(decoded.ack, msg);
//! ```

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{status, Codec, Decoded, StatusCode};
use crate::error::Result;

/// MessagePack codec for structured data.
///
/// `Req` is the outbound type, `Ack` the inbound type. A read that is not a
/// complete MessagePack value fails decoding, so pair this codec with
/// [`Framed`](super::Framed) when messages can span reads.
pub struct MsgPackCodec<Req, Ack> {
    _marker: PhantomData<fn(&Req) -> Ack>,
}

impl<Req, Ack> MsgPackCodec<Req, Ack> {
    /// Create a new codec.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl<Req, Ack> Default for MsgPackCodec<Req, Ack> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Ack> Clone for MsgPackCodec<Req, Ack> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<Req, Ack> fmt::Debug for MsgPackCodec<Req, Ack> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MsgPackCodec")
    }
}

impl<Req, Ack> Codec for MsgPackCodec<Req, Ack>
where
    Req: Serialize + 'static,
    Ack: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Request = Req;
    type Ack = Ack;
    type Code = StatusCode;

    #[inline]
    fn no_error_code(&self) -> StatusCode {
        status::NO_ERROR
    }

    fn serialize(&self, request: &Req) -> (Bytes, StatusCode) {
        match Self::encode(request) {
            Ok(bytes) => (Bytes::from(bytes), status::NO_ERROR),
            Err(e) => {
                tracing::warn!("MsgPack encode failed: {}", e);
                (Bytes::new(), status::ENCODE_FAILED)
            }
        }
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Option<Decoded<Ack>>> {
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(Decoded::one(Self::decode(bytes)?)))
    }
}

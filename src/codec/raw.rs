//! Raw codec - pass-through for binary data.
//!
//! Used when payloads are already serialized or are opaque bytes.
//! Outbound `Bytes` are handed to the transport without copying.
//!
//! # Example
//!
//! ```
//! use sockwire::codec::{Codec, RawCodec, status};
//! use bytes::Bytes;
//!
//! let codec = RawCodec;
//! let payload = Bytes::from_static(b"zero copy");
//! let (out, code) = codec.serialize(&payload);
//! assert_eq!(code, status::NO_ERROR);
//! assert_eq!(out.as_ptr(), payload.as_ptr()); // Same memory
//! ```

use bytes::Bytes;

use super::{status, Codec, Decoded, StatusCode};
use crate::error::Result;

/// Raw codec that passes bytes through without transformation.
///
/// Never rejects an outbound message. Every non-empty read is delivered as
/// one message.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Request = Bytes;
    type Ack = Bytes;
    type Code = StatusCode;

    #[inline]
    fn no_error_code(&self) -> StatusCode {
        status::NO_ERROR
    }

    #[inline]
    fn serialize(&self, request: &Bytes) -> (Bytes, StatusCode) {
        (request.clone(), status::NO_ERROR)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Option<Decoded<Bytes>>> {
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(Decoded::one(Bytes::copy_from_slice(bytes))))
    }
}

//! Codec module - the pluggable serialization contract.
//!
//! A [`Codec`] turns typed outbound requests into byte payloads and inbound
//! byte slices into typed acknowledgements. Codecs are pure: they never touch
//! the socket. The client owns ordering, retries and framing-free delivery;
//! the codec owns the bytes.
//!
//! Built-in codecs:
//!
//! - [`RawCodec`] - Pass-through for raw bytes
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//! - [`Framed`] - Length-prefixed wrapper that reassembles fragmented reads
//!
//! # Error codes
//!
//! Serialization reports application errors through a return code compared
//! against [`Codec::no_error_code`] rather than through `Result`. The
//! built-in codecs use the [`StatusCode`] constants in [`status`].
//!
//! # Example
//!
//! ```
//! use sockwire::codec::{Codec, MsgPackCodec, status};
//!
//! let codec = MsgPackCodec::<String, String>::new();
//! let (bytes, code) = codec.serialize(&"hello".to_string());
//! assert_eq!(code, status::NO_ERROR);
//!
//! let decoded = codec.deserialize(&bytes).unwrap().unwrap();
//! assert_eq!(decoded.ack, "hello");
//! ```

mod framed;
mod msgpack;
mod raw;

use std::fmt::Debug;

use bytes::Bytes;

use crate::error::Result;

pub use framed::{FrameAssembler, Framed, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
pub use msgpack::MsgPackCodec;
pub use raw::RawCodec;

/// Status code type used by the built-in codecs.
pub type StatusCode = i32;

/// Status codes returned by the built-in codecs.
pub mod status {
    use super::StatusCode;

    /// Serialization succeeded.
    pub const NO_ERROR: StatusCode = 0;
    /// The value could not be encoded.
    pub const ENCODE_FAILED: StatusCode = 1;
    /// The encoded payload does not fit in one frame.
    pub const FRAME_TOO_LARGE: StatusCode = 2;
}

/// Messages recovered from one inbound read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<A> {
    /// The decoded value.
    pub ack: A,
    /// How many logical messages `ack` represents.
    pub count: usize,
}

impl<A> Decoded<A> {
    /// A single decoded message.
    #[inline]
    pub fn one(ack: A) -> Self {
        Self { ack, count: 1 }
    }
}

/// Bidirectional transform between typed messages and byte payloads.
pub trait Codec: Send + Sync + 'static {
    /// Outbound message type.
    type Request;
    /// Inbound message type. Cloned once per event subscriber.
    type Ack: Clone + Send + Sync + 'static;
    /// Application error code returned by [`serialize`](Codec::serialize).
    type Code: Copy + Eq + Debug + Send + Sync + 'static;

    /// The code meaning "serialized successfully".
    fn no_error_code(&self) -> Self::Code;

    /// Encode a request. Any code other than `no_error_code()` rejects it.
    fn serialize(&self, request: &Self::Request) -> (Bytes, Self::Code);

    /// Decode the bytes of one transport read.
    ///
    /// `Ok(None)` means the bytes were accepted but did not complete a
    /// message yet. `Err` is fatal for the connection.
    fn deserialize(&self, bytes: &[u8]) -> Result<Option<Decoded<Self::Ack>>>;

    /// Drop any partially reassembled inbound state.
    ///
    /// Called every time a new connection becomes active.
    fn reset(&self) {}
}

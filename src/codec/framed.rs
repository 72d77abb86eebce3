//! Length-prefixed framing on top of any [`Codec`].
//!
//! The client delivers raw reads: one read may hold half a message, or
//! three. [`Framed`] prefixes every outbound payload with its length and
//! reassembles inbound frames with a [`FrameAssembler`]:
//!
//! ```text
//! ┌──────────────┬─────────────────────┐
//! │ Length       │ Payload             │
//! │ 4 bytes      │ Length bytes        │
//! │ uint32 BE    │ inner codec output  │
//! └──────────────┴─────────────────────┘
//! ```
//!
//! Decoding one read may yield zero or more frames. Their acknowledgements
//! are returned together as one `Vec`, with `count` set to the number of
//! logical messages.
//!
//! # Example
//!
//! ```
//! use sockwire::codec::{Codec, Framed, RawCodec};
//! use bytes::Bytes;
//!
//! let codec = Framed::new(RawCodec);
//! let (wire, _) = codec.serialize(&Bytes::from_static(b"hello"));
//!
//! // Arrives split across two reads.
//! assert!(codec.deserialize(&wire[..3]).unwrap().is_none());
//! let decoded = codec.deserialize(&wire[3..]).unwrap().unwrap();
//! assert_eq!(decoded.count, 1);
//! assert_eq!(decoded.ack[0], Bytes::from_static(b"hello"));
//! ```

use std::sync::{Mutex, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};

use super::{status, Codec, Decoded, StatusCode};
use crate::error::{Result, SockwireError};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame payload size (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Need at least 4 bytes for the length prefix.
    WaitingForLength,
    /// Length parsed, waiting for payload bytes.
    WaitingForPayload { remaining: usize },
}

/// Accumulates inbound bytes and extracts complete length-prefixed frames.
///
/// All data is stored in a single `BytesMut`; extracted payloads are frozen
/// slices of it, so no per-frame copy happens.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    state: State,
    max_frame_size: usize,
}

impl FrameAssembler {
    /// Create an assembler with the default maximum frame size.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create an assembler with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data and extract all complete frames.
    ///
    /// # Errors
    ///
    /// Returns [`SockwireError::FrameTooLarge`] if a length prefix exceeds the
    /// maximum. The assembler is cleared in that case.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match self.try_extract_one() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return Ok(frames),
                Err(e) => {
                    self.clear();
                    return Err(e);
                }
            }
        }
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        if let State::WaitingForLength = self.state {
            if self.buffer.len() < LENGTH_PREFIX_SIZE {
                return Ok(None);
            }

            let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
            prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_SIZE]);
            let size = u32::from_be_bytes(prefix) as usize;

            if size > self.max_frame_size {
                return Err(SockwireError::FrameTooLarge {
                    size,
                    max: self.max_frame_size,
                });
            }

            let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
            self.state = State::WaitingForPayload { remaining: size };
        }

        let State::WaitingForPayload { remaining } = self.state else {
            return Ok(None);
        };

        if self.buffer.len() < remaining {
            return Ok(None);
        }

        let payload = self.buffer.split_to(remaining).freeze();
        self.state = State::WaitingForLength;
        Ok(Some(payload))
    }

    /// Number of buffered bytes not yet part of a returned frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Length-prefix wrapper around an inner codec.
///
/// Inbound reads are sequential per connection, so the assembler lock is
/// never contended.
#[derive(Debug)]
pub struct Framed<C> {
    inner: C,
    assembler: Mutex<FrameAssembler>,
    max_frame_size: usize,
}

impl<C> Framed<C> {
    /// Wrap `inner` with the default maximum frame size.
    pub fn new(inner: C) -> Self {
        Self::with_max_frame_size(inner, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Wrap `inner` with a custom maximum frame size (both directions).
    pub fn with_max_frame_size(inner: C, max_frame_size: usize) -> Self {
        let max_frame_size = max_frame_size.min(u32::MAX as usize);
        Self {
            inner,
            assembler: Mutex::new(FrameAssembler::with_max_frame_size(max_frame_size)),
            max_frame_size,
        }
    }

    /// The wrapped codec.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Maximum payload size of one frame.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Bytes buffered while waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.assembler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<C> Codec for Framed<C>
where
    C: Codec<Code = StatusCode>,
{
    type Request = C::Request;
    type Ack = Vec<C::Ack>;
    type Code = StatusCode;

    fn no_error_code(&self) -> StatusCode {
        self.inner.no_error_code()
    }

    fn serialize(&self, request: &C::Request) -> (Bytes, StatusCode) {
        let (payload, code) = self.inner.serialize(request);
        if code != self.inner.no_error_code() {
            return (Bytes::new(), code);
        }
        if payload.len() > self.max_frame_size {
            tracing::warn!(
                "Frame of {} bytes exceeds maximum {}",
                payload.len(),
                self.max_frame_size
            );
            return (Bytes::new(), status::FRAME_TOO_LARGE);
        }

        let mut framed = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        framed.put_u32(payload.len() as u32);
        framed.extend_from_slice(&payload);
        (framed.freeze(), code)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Option<Decoded<Self::Ack>>> {
        let frames = self
            .assembler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bytes)?;

        let mut acks = Vec::with_capacity(frames.len());
        let mut count = 0;
        for frame in frames {
            if let Some(decoded) = self.inner.deserialize(&frame)? {
                count += decoded.count;
                acks.push(decoded.ack);
            }
        }

        if acks.is_empty() {
            return Ok(None);
        }
        Ok(Some(Decoded { ack: acks, count }))
    }

    fn reset(&self) {
        self.assembler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.inner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MsgPackCodec, RawCodec};

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut bytes = (payload.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_single_complete_frame() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&frame(b"hello")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"hello");
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut assembler = FrameAssembler::new();
        let mut combined = frame(b"first");
        combined.extend(frame(b"second"));
        combined.extend(frame(b"third"));

        let frames = assembler.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[2][..], b"third");
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_fragmented_length() {
        let mut assembler = FrameAssembler::new();
        let bytes = frame(b"test");

        assert!(assembler.push(&bytes[..2]).unwrap().is_empty());
        assert_eq!(assembler.state_name(), "WaitingForLength");

        let frames = assembler.push(&bytes[2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_fragmented_payload() {
        let mut assembler = FrameAssembler::new();
        let payload = b"this is a longer payload that will be fragmented";
        let bytes = frame(payload);

        let partial = LENGTH_PREFIX_SIZE + 10;
        assert!(assembler.push(&bytes[..partial]).unwrap().is_empty());
        assert_eq!(assembler.state_name(), "WaitingForPayload");

        let frames = assembler.push(&bytes[partial..]).unwrap();
        assert_eq!(&frames[0][..], payload);
    }

    #[test]
    fn test_empty_payload() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&frame(b"")).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut assembler = FrameAssembler::new();
        let mut all = Vec::new();
        for byte in frame(b"hi") {
            all.extend(assembler.push(&[byte]).unwrap());
        }

        assert_eq!(all.len(), 1);
        assert_eq!(&all[0][..], b"hi");
    }

    #[test]
    fn test_max_frame_validation() {
        let mut assembler = FrameAssembler::with_max_frame_size(100);
        let result = assembler.push(&1000u32.to_be_bytes());

        assert!(matches!(
            result,
            Err(SockwireError::FrameTooLarge { size: 1000, max: 100 })
        ));
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_framed_raw_multiple_messages_one_read() {
        let codec = Framed::new(RawCodec);
        let mut wire = Vec::new();
        for word in [&b"one"[..], b"two", b"three"] {
            let (bytes, code) = codec.serialize(&Bytes::copy_from_slice(word));
            assert_eq!(code, status::NO_ERROR);
            wire.extend_from_slice(&bytes);
        }

        let decoded = codec.deserialize(&wire).unwrap().unwrap();
        assert_eq!(decoded.count, 3);
        assert_eq!(decoded.ack[1], Bytes::from_static(b"two"));
    }

    #[test]
    fn test_framed_msgpack_split_read() {
        let codec = Framed::new(MsgPackCodec::<String, String>::new());
        let (wire, _) = codec.serialize(&"fragmented message".to_string());
        let mid = wire.len() / 2;

        assert!(codec.deserialize(&wire[..mid]).unwrap().is_none());
        assert!(codec.buffered() > 0);

        let decoded = codec.deserialize(&wire[mid..]).unwrap().unwrap();
        assert_eq!(decoded.ack, vec!["fragmented message".to_string()]);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_framed_rejects_oversize_outbound() {
        let codec = Framed::with_max_frame_size(RawCodec, 4);
        let (bytes, code) = codec.serialize(&Bytes::from_static(b"too long"));

        assert_eq!(code, status::FRAME_TOO_LARGE);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_framed_prefixes_inner_payload() {
        let codec = Framed::new(MsgPackCodec::<f64, f64>::new());
        let (bytes, code) = codec.serialize(&1.5);
        assert_eq!(code, status::NO_ERROR);
        assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + 9);
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let codec = Framed::new(RawCodec);
        let (wire, _) = codec.serialize(&Bytes::from_static(b"partial"));

        codec.deserialize(&wire[..5]).unwrap();
        codec.reset();
        assert_eq!(codec.buffered(), 0);

        let decoded = codec.deserialize(&wire).unwrap().unwrap();
        assert_eq!(decoded.ack[0], Bytes::from_static(b"partial"));
    }
}

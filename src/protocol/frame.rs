//! Frame types.
//!
//! - [`Frame`] - header plus zero-copy payload, as reassembled from the link
//! - [`InboundFrame`] - a notification copied into a pooled buffer, the
//!   unit whose ownership moves from the receive path to notification jobs
//!
//! # Example
//!
//! ```
//! use altcom_rpc::protocol::{build_frame, Frame, Header};
//! use bytes::Bytes;
//!
//! let header = Header::new(1, 0x0311, 42, 4);
//! let frame = Frame::new(header, Bytes::from_static(&[0, 0, 0, 7]));
//! assert_eq!(frame.command_id(), 0x0311);
//! assert_eq!(build_frame(&header, frame.payload()).len(), 12);
//! ```

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};
use crate::buffer::{BufferPool, PooledBuffer};
use crate::codec::{decode_payload, Payload};
use crate::error::{AllocationFailure, DecodeError};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the command ID.
    #[inline]
    pub fn command_id(&self) -> u16 {
        self.header.command_id
    }

    /// Get the transaction ID.
    #[inline]
    pub fn transaction_id(&self) -> u16 {
        self.header.transaction_id
    }

    /// Copy the frame into a buffer taken from `pool`.
    pub fn into_pooled(self, pool: &BufferPool) -> Result<InboundFrame, AllocationFailure> {
        let mut buffer = pool.acquire(self.header.frame_len())?;
        let out = buffer.bytes_mut();
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        Ok(InboundFrame {
            header: self.header,
            buffer,
        })
    }
}

/// A received frame held in a pooled buffer.
///
/// Whoever holds an `InboundFrame` owns its buffer; it goes back to the
/// pool on [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct InboundFrame {
    header: Header,
    buffer: PooledBuffer,
}

impl InboundFrame {
    /// Parse a pooled buffer holding one encoded frame.
    ///
    /// Hands the buffer back if the header is missing or disagrees with the
    /// buffer length.
    pub fn parse(buffer: PooledBuffer) -> Result<Self, PooledBuffer> {
        match Header::decode(&buffer) {
            Some(header) if header.frame_len() == buffer.len() => Ok(Self { header, buffer }),
            _ => Err(buffer),
        }
    }

    /// Decoded header.
    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Payload bytes following the header.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buffer[HEADER_SIZE..]
    }

    /// Complete encoded frame.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Decode the payload as `P`, checking its length first.
    pub fn decode<P: Payload>(&self) -> Result<P, DecodeError> {
        decode_payload(self.payload())
    }

    /// Give the buffer back to the pool.
    pub fn release(mut self) {
        self.buffer.release();
    }

    /// Unwrap into the underlying buffer.
    pub fn into_buffer(self) -> PooledBuffer {
        self.buffer
    }
}

/// Build a complete frame as a single byte vector.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

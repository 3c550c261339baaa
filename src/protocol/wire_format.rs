//! Wire format encoding and decoding.
//!
//! Implements the 8-byte command header:
//! ```text
//! ┌─────────┬────────┬────────────┬────────────┬────────────┐
//! │ Version │ Seq ID │ Command ID │ Trans. ID  │ Length     │
//! │ 1 byte  │ 1 byte │ uint16 BE  │ uint16 BE  │ uint16 BE  │
//! └─────────┴────────┴────────────┴────────────┴────────────┘
//! ```
//!
//! The header is followed by `Length` bytes of operation payload. All
//! multi-byte integers are Big Endian.

use crate::error::{AltcomError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Protocol version carried in every frame.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Default maximum payload size accepted on the link.
pub const DEFAULT_MAX_PAYLOAD_SIZE: u16 = 4096;

/// Command identifiers known to this crate.
pub mod command {
    /// Unsolicited indication that the modem rejected a command.
    pub const ERROR_INDICATION: u16 = 0x00FF;
    /// TLS configuration initialization.
    pub const TLS_CONFIG_INIT: u16 = 0x0311;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version.
    pub version: u8,
    /// Per-link rolling sequence number.
    pub sequence_id: u8,
    /// Command identifier.
    pub command_id: u16,
    /// Transaction identifier correlating a response to its command.
    pub transaction_id: u16,
    /// Payload length in bytes.
    pub payload_length: u16,
}

impl Header {
    /// Create a header for the current protocol version.
    pub fn new(sequence_id: u8, command_id: u16, transaction_id: u16, payload_length: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence_id,
            command_id,
            transaction_id,
            payload_length,
        }
    }

    /// Header for an outgoing command whose ids are not assigned yet.
    ///
    /// The gateway stamps sequence and transaction ids at send time.
    pub fn command(command_id: u16, payload_length: u16) -> Self {
        Self::new(0, command_id, 0, payload_length)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use altcom_rpc::protocol::Header;
    ///
    /// let header = Header::new(1, 0x0311, 42, 4);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 8);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into the first `HEADER_SIZE` bytes of `buf`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.version;
        buf[1] = self.sequence_id;
        buf[2..4].copy_from_slice(&self.command_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.transaction_id.to_be_bytes());
        buf[6..8].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use altcom_rpc::protocol::Header;
    ///
    /// let bytes = [0x01, 7, 0x03, 0x11, 0, 42, 0, 4];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.command_id, 0x0311);
    /// assert_eq!(header.transaction_id, 42);
    /// assert_eq!(header.payload_length, 4);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            version: buf[0],
            sequence_id: buf[1],
            command_id: u16::from_be_bytes([buf[2], buf[3]]),
            transaction_id: u16::from_be_bytes([buf[4], buf[5]]),
            payload_length: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }

    /// Overwrite the sequence and transaction ids of an encoded header.
    pub fn stamp_ids(buf: &mut [u8], sequence_id: u8, transaction_id: u16) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[1] = sequence_id;
        buf[4..6].copy_from_slice(&transaction_id.to_be_bytes());
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks the version byte and that the payload fits the link limit.
    pub fn validate(&self, max_payload_size: u16) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(AltcomError::Protocol(format!(
                "Unsupported protocol version {:#04x}",
                self.version
            )));
        }

        if self.payload_length > max_payload_size {
            return Err(AltcomError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }

    /// Total encoded frame size (header + payload).
    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }

    /// Check if this header carries an error indication.
    #[inline]
    pub fn is_error_indication(&self) -> bool {
        self.command_id == command::ERROR_INDICATION
    }
}

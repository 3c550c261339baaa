//! Error indication notifications.
//!
//! The modem sends an error indication when it rejects a command. The
//! payload repeats the header of the offending command; the job logs it and
//! releases the frame. Nothing is sent back.

use bytes::{Buf, BufMut, BytesMut};

use crate::codec::Payload;
use crate::protocol::{Header, InboundFrame};

/// Payload of an error indication: the header of the rejected command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorIndication {
    /// Protocol version of the rejected command.
    pub version: u8,
    /// Its sequence id.
    pub sequence_id: u8,
    /// Its command id.
    pub command_id: u16,
    /// Its transaction id.
    pub transaction_id: u16,
    /// Its payload length.
    pub data_length: u16,
}

impl From<Header> for ErrorIndication {
    fn from(h: Header) -> Self {
        Self {
            version: h.version,
            sequence_id: h.sequence_id,
            command_id: h.command_id,
            transaction_id: h.transaction_id,
            data_length: h.payload_length,
        }
    }
}

impl Payload for ErrorIndication {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.sequence_id);
        buf.put_u16(self.command_id);
        buf.put_u16(self.transaction_id);
        buf.put_u16(self.data_length);
    }

    fn decode(mut buf: &[u8]) -> Self {
        Self {
            version: buf.get_u8(),
            sequence_id: buf.get_u8(),
            command_id: buf.get_u16(),
            transaction_id: buf.get_u16(),
            data_length: buf.get_u16(),
        }
    }
}

/// Job body for an error indication: log, then release.
pub async fn handle_error_indication(frame: InboundFrame) {
    let indication = match frame.decode::<ErrorIndication>() {
        Ok(indication) => indication,
        Err(e) => {
            tracing::warn!(error = %e, "malformed error indication payload, logging frame header");
            ErrorIndication::from(*frame.header())
        }
    };

    tracing::error!(
        version = indication.version,
        sequence_id = indication.sequence_id,
        command_id = indication.command_id,
        transaction_id = indication.transaction_id,
        data_length = indication.data_length,
        "received error indication"
    );

    frame.release();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::codec::decode_payload;
    use crate::protocol::{build_frame, command, HEADER_SIZE};

    fn errind_frame(pool: &BufferPool, payload: &[u8]) -> InboundFrame {
        let mut buf = pool.acquire(HEADER_SIZE + payload.len()).unwrap();
        let header = Header::new(3, command::ERROR_INDICATION, 0, payload.len() as u16);
        buf.bytes_mut().extend_from_slice(&build_frame(&header, payload));
        InboundFrame::parse(buf).unwrap()
    }

    #[test]
    fn test_payload_layout() {
        let bytes = [0x01, 0x05, 0x03, 0x11, 0x00, 0x2A, 0x00, 0x04];
        let indication: ErrorIndication = decode_payload(&bytes).unwrap();
        assert_eq!(
            indication,
            ErrorIndication {
                version: 1,
                sequence_id: 5,
                command_id: 0x0311,
                transaction_id: 42,
                data_length: 4,
            }
        );

        let mut out = BytesMut::new();
        indication.encode(&mut out);
        assert_eq!(&out[..], &bytes);
    }

    #[tokio::test]
    async fn test_job_releases_buffer() {
        let pool = BufferPool::default();
        let frame = errind_frame(&pool, &[0x01, 0x05, 0x03, 0x11, 0x00, 0x2A, 0x00, 0x04]);
        assert_eq!(pool.stats().outstanding, 1);

        handle_error_indication(frame).await;
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_short_payload_still_released() {
        let pool = BufferPool::default();
        let frame = errind_frame(&pool, &[0x01, 0x05]);

        handle_error_indication(frame).await;
        assert_eq!(pool.stats().outstanding, 0);
    }
}

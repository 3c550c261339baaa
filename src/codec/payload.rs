//! Fixed-size payload encoding.
//!
//! Every operation payload has a declared size known at compile time. Multi
//! byte fields are written in network byte order via [`bytes::BufMut`] and
//! read back via [`bytes::Buf`].

use bytes::{Buf, BufMut, BytesMut};

use crate::error::DecodeError;

/// A payload with a fixed wire size.
pub trait Payload: Sized {
    /// Exact encoded size in bytes.
    const SIZE: usize;

    /// Append exactly [`SIZE`](Self::SIZE) bytes to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Read a value from exactly [`SIZE`](Self::SIZE) bytes.
    ///
    /// Callers check the length first; see [`decode_payload`].
    fn decode(buf: &[u8]) -> Self;
}

/// A response payload that carries the remote result code.
pub trait RemoteResult {
    /// Signed result code: 0 on success, negative on remote failure.
    fn result_code(&self) -> i32;
}

/// Decode `bytes` as `P`, refusing anything but the declared size.
///
/// The length is checked before any field is read.
pub fn decode_payload<P: Payload>(bytes: &[u8]) -> Result<P, DecodeError> {
    if bytes.len() != P::SIZE {
        return Err(DecodeError::LengthMismatch {
            expected: P::SIZE,
            actual: bytes.len(),
        });
    }
    Ok(P::decode(bytes))
}

/// Response that only carries a result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCode(pub i32);

impl ResultCode {
    /// Code the modem returns for success.
    pub const SUCCESS: ResultCode = ResultCode(0);

    /// True for a zero code.
    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl Payload for ResultCode {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.0);
    }

    fn decode(mut buf: &[u8]) -> Self {
        ResultCode(buf.get_i32())
    }
}

impl RemoteResult for ResultCode {
    fn result_code(&self) -> i32 {
        self.0
    }
}

/// Request that carries a single context or configuration id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextIdRequest {
    /// Remote-side resource id.
    pub id: u32,
}

impl Payload for ContextIdRequest {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.id);
    }

    fn decode(mut buf: &[u8]) -> Self {
        ContextIdRequest { id: buf.get_u32() }
    }
}

//! Operation descriptors and the command/response envelope transform.

use crate::buffer::PooledBuffer;
use crate::error::{AltcomError, DecodeError, Result};
use crate::protocol::{Header, HEADER_SIZE};

use super::{Payload, RemoteResult};

/// Static metadata describing one remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationDescriptor {
    /// Name used in logs.
    pub name: &'static str,
    /// Command id placed in the frame header.
    pub command_id: u16,
    /// Declared request payload size.
    pub request_size: usize,
    /// Declared response payload size.
    pub response_size: usize,
}

/// A remote operation: a command id plus its request and response payloads.
///
/// # Example
///
/// ```
/// use altcom_rpc::codec::{ContextIdRequest, Operation, ResultCode};
///
/// struct CtrDrbgFree;
///
/// impl Operation for CtrDrbgFree {
///     const NAME: &'static str = "ctr_drbg_free";
///     const COMMAND_ID: u16 = 0x0342;
///     type Request = ContextIdRequest;
///     type Response = ResultCode;
/// }
///
/// assert_eq!(CtrDrbgFree::DESCRIPTOR.request_size, 4);
/// ```
pub trait Operation {
    /// Name used in logs.
    const NAME: &'static str;
    /// Command id placed in the frame header.
    const COMMAND_ID: u16;

    /// Request payload.
    type Request: Payload;
    /// Response payload.
    type Response: Payload + RemoteResult;

    /// Descriptor derived from the associated items.
    const DESCRIPTOR: OperationDescriptor = OperationDescriptor {
        name: Self::NAME,
        command_id: Self::COMMAND_ID,
        request_size: <Self::Request as Payload>::SIZE,
        response_size: <Self::Response as Payload>::SIZE,
    };
}

/// Encode `request` as a complete command frame into `buf`.
///
/// Sequence and transaction ids are left zero for the gateway to stamp.
pub fn encode_request<O: Operation>(request: &O::Request, buf: &mut PooledBuffer) -> Result<()> {
    let descriptor = O::DESCRIPTOR;
    let payload_length = u16::try_from(descriptor.request_size).map_err(|_| {
        AltcomError::Protocol(format!(
            "{} request of {} bytes does not fit a frame",
            descriptor.name, descriptor.request_size
        ))
    })?;

    buf.clear();
    let out = buf.bytes_mut();
    out.extend_from_slice(&Header::command(descriptor.command_id, payload_length).encode());
    request.encode(out);

    let written = buf.len() - HEADER_SIZE;
    if written != descriptor.request_size {
        return Err(AltcomError::Protocol(format!(
            "{} encoder wrote {} bytes, declared {}",
            descriptor.name, written, descriptor.request_size
        )));
    }
    Ok(())
}

/// Decode the response held in `frame`, of which `received` payload bytes
/// arrived.
///
/// Fails with [`DecodeError::LengthMismatch`] before touching any field
/// when `received` differs from the declared response size.
pub fn decode_response<O: Operation>(
    frame: &[u8],
    received: usize,
) -> std::result::Result<O::Response, DecodeError> {
    let expected = O::DESCRIPTOR.response_size;
    if received != expected {
        return Err(DecodeError::LengthMismatch {
            expected,
            actual: received,
        });
    }

    let payload = frame
        .get(HEADER_SIZE..HEADER_SIZE + received)
        .ok_or(DecodeError::LengthMismatch {
            expected,
            actual: frame.len().saturating_sub(HEADER_SIZE),
        })?;
    Ok(O::Response::decode(payload))
}

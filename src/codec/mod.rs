//! Codec module - operation payloads and the command/response envelope.
//!
//! - [`Payload`] - fixed-size, network-order payload encoding
//! - [`Operation`] - static descriptor tying a command id to its payloads
//! - [`encode_request`] / [`decode_response`] - frame transforms used by the
//!   operation façade
//!
//! # Example
//!
//! ```
//! use altcom_rpc::codec::{decode_payload, ContextIdRequest, Payload};
//! use bytes::BytesMut;
//!
//! let mut buf = BytesMut::new();
//! ContextIdRequest { id: 7 }.encode(&mut buf);
//! let decoded: ContextIdRequest = decode_payload(&buf).unwrap();
//! assert_eq!(decoded.id, 7);
//! ```

mod operation;
mod payload;

pub use operation::{decode_response, encode_request, Operation, OperationDescriptor};
pub use payload::{decode_payload, ContextIdRequest, Payload, RemoteResult, ResultCode};

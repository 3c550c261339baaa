//! Protocol module - wire format, framing, and frame types.
//!
//! - 8-byte header encoding/decoding
//! - Frame buffer for reassembling frames from a byte stream
//! - Frame types, including pooled inbound frames

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame, InboundFrame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{command, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, PROTOCOL_VERSION};

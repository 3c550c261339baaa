//! Buffer lifecycle - pooled frame buffers and paired exchange buffers.
//!
//! - [`BufferPool`] - bounded pool shared by every caller and the receive path
//! - [`PooledBuffer`] - a buffer on loan, released explicitly or on drop
//! - [`ExchangeBuffers`] - command + response pair acquired atomically

mod exchange;
mod pool;

pub use exchange::ExchangeBuffers;
pub use pool::{BufferPool, PoolConfig, PoolStats, PooledBuffer, DEFAULT_MAX_BUFFERS};

//! Paired command/response buffers for one synchronous exchange.

use crate::codec::OperationDescriptor;
use crate::error::AllocationFailure;
use crate::protocol::HEADER_SIZE;

use super::{BufferPool, PooledBuffer};

/// Command and response buffers owned by one in-flight exchange.
///
/// Both buffers go back to the pool exactly once: through
/// [`release`](Self::release), or on drop if the exchange ended early.
#[derive(Debug)]
pub struct ExchangeBuffers {
    /// Encoded command frame.
    pub command: PooledBuffer,
    /// Received response frame.
    pub response: PooledBuffer,
}

impl ExchangeBuffers {
    /// Acquire both buffers for `descriptor`, or neither.
    ///
    /// Sizes are the declared payload sizes plus the frame header.
    pub fn acquire(
        pool: &BufferPool,
        descriptor: &OperationDescriptor,
    ) -> Result<Self, AllocationFailure> {
        let command = pool.acquire(HEADER_SIZE + descriptor.request_size)?;
        let response = match pool.acquire(HEADER_SIZE + descriptor.response_size) {
            Ok(buf) => buf,
            Err(e) => {
                tracing::warn!(
                    operation = descriptor.name,
                    command_id = descriptor.command_id,
                    requested = e.requested,
                    "response buffer allocation failed"
                );
                // `command` drops here and goes back to the pool
                return Err(e);
            }
        };

        Ok(Self { command, response })
    }

    /// Return both buffers to the pool.
    pub fn release(&mut self) {
        self.command.release();
        self.response.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PoolConfig;

    fn descriptor(request_size: usize, response_size: usize) -> OperationDescriptor {
        OperationDescriptor {
            name: "test",
            command_id: 0x0100,
            request_size,
            response_size,
        }
    }

    #[test]
    fn test_buffers_sized_to_descriptor() {
        let pool = BufferPool::default();
        let buffers = ExchangeBuffers::acquire(&pool, &descriptor(4, 12)).unwrap();

        assert_eq!(buffers.command.size(), HEADER_SIZE + 4);
        assert_eq!(buffers.response.size(), HEADER_SIZE + 12);
        assert_eq!(pool.stats().outstanding, 2);
    }

    #[test]
    fn test_partial_acquisition_rolls_back() {
        let pool = BufferPool::new(&PoolConfig {
            max_buffers: 1,
            max_buffer_size: 64,
        });

        let err = ExchangeBuffers::acquire(&pool, &descriptor(4, 4)).unwrap_err();
        assert_eq!(err.requested, HEADER_SIZE + 4);

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.acquired, stats.released);
    }

    #[test]
    fn test_oversized_response_rolls_back() {
        let pool = BufferPool::new(&PoolConfig {
            max_buffers: 4,
            max_buffer_size: 16,
        });

        assert!(ExchangeBuffers::acquire(&pool, &descriptor(4, 64)).is_err());
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_release_then_drop_releases_once() {
        let pool = BufferPool::default();
        let mut buffers = ExchangeBuffers::acquire(&pool, &descriptor(4, 4)).unwrap();

        buffers.release();
        buffers.release();
        drop(buffers);

        let stats = pool.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.outstanding, 0);
    }
}

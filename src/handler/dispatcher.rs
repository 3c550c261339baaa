//! Notification dispatcher.
//!
//! Classifies inbound frames that belong to no exchange and hands them to
//! the job queue. The receive path only classifies; handlers always run on
//! a job.

use std::sync::Arc;

use crate::buffer::PooledBuffer;
use crate::protocol::{InboundFrame, PROTOCOL_VERSION};

use super::{HandlerRegistry, JobQueue};

/// Result of dispatching one notification.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A job now owns the frame.
    Started,
    /// No handler for the command id. The buffer is handed back unreleased.
    Unsupported(PooledBuffer),
    /// The frame was malformed or the job queue refused it. The buffer has
    /// been released.
    InternalError,
}

impl DispatchOutcome {
    /// True for [`DispatchOutcome::Started`].
    pub fn is_started(&self) -> bool {
        matches!(self, DispatchOutcome::Started)
    }
}

/// Routes notifications to their handlers through a [`JobQueue`].
#[derive(Clone, Debug)]
pub struct NotificationDispatcher {
    registry: Arc<HandlerRegistry>,
    jobs: JobQueue,
}

impl NotificationDispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: HandlerRegistry, jobs: JobQueue) -> Self {
        Self {
            registry: Arc::new(registry),
            jobs,
        }
    }

    /// Registered handlers.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Job queue used for handlers.
    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    /// Classify a raw inbound buffer and start its handler.
    pub fn dispatch(&self, buffer: PooledBuffer) -> DispatchOutcome {
        match InboundFrame::parse(buffer) {
            Ok(frame) => self.dispatch_frame(frame),
            Err(mut buffer) => {
                tracing::error!(len = buffer.len(), "malformed notification frame");
                buffer.release();
                DispatchOutcome::InternalError
            }
        }
    }

    /// Start the handler for an already parsed frame.
    pub fn dispatch_frame(&self, frame: InboundFrame) -> DispatchOutcome {
        let header = *frame.header();
        if header.version != PROTOCOL_VERSION {
            tracing::error!(
                version = header.version,
                command_id = header.command_id,
                "notification with unsupported protocol version"
            );
            frame.release();
            return DispatchOutcome::InternalError;
        }

        let Some(entry) = self.registry.get(header.command_id) else {
            return DispatchOutcome::Unsupported(frame.into_buffer());
        };

        match self.jobs.submit(entry.handle(frame)) {
            Ok(()) => {
                tracing::debug!(
                    command_id = header.command_id,
                    handler = entry.name(),
                    "notification handling started"
                );
                DispatchOutcome::Started
            }
            Err(job) => {
                tracing::error!(
                    command_id = header.command_id,
                    handler = entry.name(),
                    capacity = self.jobs.capacity(),
                    "job queue full, dropping notification"
                );
                // The rejected job still owns the frame
                drop(job);
                DispatchOutcome::InternalError
            }
        }
    }
}

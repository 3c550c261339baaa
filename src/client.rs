//! Session builder and receive loop.
//!
//! The [`AltcomBuilder`] collects configuration and notification handlers
//! and builds an [`Altcom`] session. The session owns the buffer pool, the
//! command gateway and the notification dispatcher. Attaching a link:
//! 1. Split the stream into read and write halves
//! 2. Spawn the writer task on the write half
//! 3. Mark the gateway initialized
//! 4. Spawn the read loop, which routes responses to the gateway and
//!    everything else to the dispatcher
//!
//! # Example
//!
//! ```no_run
//! use altcom_rpc::ops::tls::SslConfig;
//! use altcom_rpc::Altcom;
//!
//! # async fn run() -> altcom_rpc::Result<()> {
//! let altcom = Altcom::builder().build();
//! altcom.connect("/run/altcom.sock").await?;
//!
//! let mut conf = SslConfig::new();
//! altcom.config_init(&mut conf).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;

use crate::buffer::BufferPool;
use crate::config::{AltcomConfig, ResultPolicy};
use crate::error::Result;
use crate::gateway::{CommandGateway, LinkId, Timeout};
use crate::handler::{
    handle_error_indication, DispatchOutcome, HandlerRegistry, JobQueue, NotificationDispatcher,
    NotificationHandler,
};
use crate::ops::{ContextIdSource, SequentialContextIds};
use crate::protocol::{command, Frame, FrameBuffer};
use crate::state::LinkState;
use crate::writer::spawn_writer_task;

/// Bytes requested from the link per read.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Builder for an [`Altcom`] session.
///
/// Starts with the error indication handler registered.
pub struct AltcomBuilder {
    config: AltcomConfig,
    registry: HandlerRegistry,
    context_ids: Option<Arc<dyn ContextIdSource>>,
}

impl AltcomBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        let mut registry = HandlerRegistry::new();
        registry.register(
            command::ERROR_INDICATION,
            "error_indication",
            handle_error_indication,
        );
        Self {
            config: AltcomConfig::default(),
            registry,
            context_ids: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: AltcomConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a notification handler for `command_id`.
    pub fn notification<H>(mut self, command_id: u16, name: &str, handler: H) -> Self
    where
        H: NotificationHandler,
    {
        self.registry.register(command_id, name, handler);
        self
    }

    /// Use `source` for remote resource ids.
    ///
    /// Default: [`SequentialContextIds`].
    pub fn context_ids<S: ContextIdSource>(mut self, source: S) -> Self {
        self.context_ids = Some(Arc::new(source));
        self
    }

    /// Set the result policy.
    pub fn result_policy(mut self, policy: ResultPolicy) -> Self {
        self.config.result_policy = policy;
        self
    }

    /// Set the default response deadline.
    pub fn request_timeout(mut self, timeout: Timeout) -> Self {
        self.config.request_timeout_ms = match timeout {
            Timeout::Forever => None,
            Timeout::After(d) => Some(d.as_millis() as u64),
        };
        self
    }

    /// Set the maximum number of concurrent notification jobs.
    pub fn max_concurrent_jobs(mut self, limit: usize) -> Self {
        self.config.max_concurrent_jobs = limit;
        self
    }

    /// Set the maximum number of outstanding buffers.
    pub fn max_buffers(mut self, limit: usize) -> Self {
        self.config.pool.max_buffers = limit;
        self
    }

    /// Build the session. No link is attached yet.
    pub fn build(self) -> Altcom {
        let context_ids = self
            .context_ids
            .unwrap_or_else(|| Arc::new(SequentialContextIds::new()));
        let jobs = JobQueue::new(self.config.max_concurrent_jobs);

        Altcom {
            inner: Arc::new(Inner {
                pool: BufferPool::new(&self.config.pool),
                gateway: Arc::new(CommandGateway::new(self.config.late_window)),
                dispatcher: NotificationDispatcher::new(self.registry, jobs),
                context_ids,
                tasks: Mutex::new(Vec::new()),
                config: self.config,
            }),
        }
    }
}

impl Default for AltcomBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    config: AltcomConfig,
    pool: BufferPool,
    gateway: Arc<CommandGateway>,
    dispatcher: NotificationDispatcher,
    context_ids: Arc<dyn ContextIdSource>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A session with the modem.
///
/// Cheap to clone; clones share the link, pool and handlers.
#[derive(Clone)]
pub struct Altcom {
    inner: Arc<Inner>,
}

impl Altcom {
    /// Create a new session builder.
    pub fn builder() -> AltcomBuilder {
        AltcomBuilder::new()
    }

    /// Attach a connected link and start serving it.
    ///
    /// Fails with `AlreadyAttached` while another link is up and with
    /// `NotInitialized` after [`shutdown`](Self::shutdown).
    pub fn attach<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, &self.inner.config.writer);

        // On failure the handle is dropped and the writer task exits
        let link = self.inner.gateway.attach(writer)?;

        let receiver = Receiver {
            link,
            pool: self.inner.pool.clone(),
            gateway: self.inner.gateway.clone(),
            dispatcher: self.inner.dispatcher.clone(),
            max_payload_size: self.inner.config.max_payload_size,
        };
        let reader_task = tokio::spawn(async move {
            if let Err(e) = receiver.read_loop(reader).await {
                tracing::error!(error = %e, "read loop error");
            }
            receiver.gateway.detach_link(receiver.link);
        });

        // A stopped writer takes its own link and read loop down with it
        let gateway = self.inner.gateway.clone();
        let reader_abort = reader_task.abort_handle();
        let watcher = tokio::spawn(async move {
            match writer_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "writer task failed"),
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::error!(error = %e, "writer task panicked"),
            }
            gateway.detach_link(link);
            reader_abort.abort();
        });

        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(watcher);
        tasks.push(reader_task);
        Ok(())
    }

    /// Connect to the modem daemon's socket at `path` and attach it.
    pub async fn connect(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let stream = crate::transport::connect(path).await?;
        self.attach(stream)
    }

    /// True while a link is attached.
    pub fn is_initialized(&self) -> bool {
        self.inner.gateway.is_initialized()
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.inner.gateway.state()
    }

    /// Tear the session down. Outstanding calls fail and no link can be
    /// attached afterwards.
    pub fn shutdown(&self) {
        self.inner.gateway.shutdown();
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &AltcomConfig {
        &self.inner.config
    }

    /// Shared buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.inner.pool
    }

    /// Command gateway.
    pub fn gateway(&self) -> &CommandGateway {
        &self.inner.gateway
    }

    /// Notification dispatcher.
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.inner.dispatcher
    }

    /// Source of remote resource ids.
    pub fn context_ids(&self) -> &dyn ContextIdSource {
        self.inner.context_ids.as_ref()
    }
}

impl std::fmt::Debug for Altcom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Altcom")
            .field("state", &self.state())
            .field("pool", &self.inner.pool)
            .field("gateway", &self.inner.gateway)
            .finish()
    }
}

/// Receive path state owned by the read loop.
struct Receiver {
    link: LinkId,
    pool: BufferPool,
    gateway: Arc<CommandGateway>,
    dispatcher: NotificationDispatcher,
    max_payload_size: u16,
}

impl Receiver {
    async fn read_loop<R: AsyncRead + Unpin>(&self, mut reader: R) -> Result<()> {
        let mut frame_buffer = FrameBuffer::with_max_payload(self.max_payload_size);
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                tracing::debug!("modem link closed");
                return Ok(());
            }

            for frame in frame_buffer.push(&buf[..n])? {
                if !self.gateway.is_current(self.link) {
                    tracing::debug!("link replaced, stopping read loop");
                    return Ok(());
                }
                self.route(frame);
            }
        }
    }

    /// Deliver one frame without blocking.
    ///
    /// Responses go straight to their waiter; only notifications take a
    /// buffer from the pool.
    fn route(&self, frame: Frame) {
        let Some(notification) = self.gateway.complete(frame) else {
            return;
        };

        let header = notification.header;
        let inbound = match notification.into_pooled(&self.pool) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!(
                    command_id = header.command_id,
                    transaction_id = header.transaction_id,
                    error = %e,
                    "no buffer for notification, dropping"
                );
                return;
            }
        };

        match self.dispatcher.dispatch_frame(inbound) {
            DispatchOutcome::Started | DispatchOutcome::InternalError => {}
            DispatchOutcome::Unsupported(mut buffer) => {
                tracing::warn!(
                    command_id = header.command_id,
                    transaction_id = header.transaction_id,
                    "unsupported event"
                );
                buffer.release();
            }
        }
    }
}

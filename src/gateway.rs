//! Command gateway - synchronous exchanges over the asynchronous link.
//!
//! Every exchange registers a oneshot waiter under a fresh transaction id,
//! stamps the id into the command header and queues the frame on the writer
//! task. The read loop hands each reassembled frame to
//! [`CommandGateway::complete`], which wakes the matching waiter. Responses
//! never touch the buffer pool on the way in: the waiter copies the payload
//! straight into the response buffer its caller acquired up front.
//!
//! ```text
//! send() ──► correlation table ──► writer task ──► link
//!   ▲              │
//!   └── oneshot ◄──┘◄── complete() ◄── read loop ◄── link
//! ```
//!
//! A waiter that gives up (timeout, link failure, dropped future) leaves its
//! transaction id in a bounded window of abandoned ids, so a response that
//! shows up afterwards is discarded instead of being treated as a
//! notification.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use crate::buffer::PooledBuffer;
use crate::error::{AltcomError, GatewayError, Result};
use crate::protocol::{Frame, Header, HEADER_SIZE};
use crate::state::{AtomicLinkState, LinkState};
use crate::writer::{OutboundFrame, WriterHandle};

/// Default number of abandoned transaction ids remembered.
pub const DEFAULT_LATE_WINDOW: usize = 64;

/// How long [`CommandGateway::send`] waits for the correlated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Wait until the response arrives or the link fails.
    #[default]
    Forever,
    /// Give up after the duration.
    After(Duration),
}

impl Timeout {
    /// `None` maps to [`Timeout::Forever`].
    pub fn from_millis(ms: Option<u64>) -> Self {
        match ms {
            Some(ms) => Timeout::After(Duration::from_millis(ms)),
            None => Timeout::Forever,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

/// Identifies one attached link.
///
/// Tasks serving a link detach with their own id, so a link that went away
/// cannot tear down the one attached after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

/// Snapshot of gateway counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GatewayStats {
    /// Exchanges waiting for a response.
    pub pending: usize,
    /// Transaction ids remembered as abandoned.
    pub abandoned: usize,
    /// Commands handed to the writer.
    pub sent: u64,
    /// Responses that arrived after their exchange was abandoned.
    pub discarded_late: u64,
}

struct Link {
    id: LinkId,
    writer: WriterHandle,
}

struct Correlation {
    last_transaction_id: u16,
    pending: HashMap<u16, oneshot::Sender<Frame>>,
    abandoned: VecDeque<u16>,
}

impl Correlation {
    fn is_taken(&self, id: u16) -> bool {
        id == 0 || self.pending.contains_key(&id) || self.abandoned.contains(&id)
    }

    /// Next nonzero id that is neither pending nor abandoned.
    fn allocate(&mut self) -> Option<u16> {
        let mut candidate = self.last_transaction_id;
        for _ in 0..u16::MAX {
            candidate = candidate.wrapping_add(1);
            if !self.is_taken(candidate) {
                self.last_transaction_id = candidate;
                return Some(candidate);
            }
        }
        None
    }

    fn take_abandoned(&mut self, id: u16) -> bool {
        match self.abandoned.iter().position(|&a| a == id) {
            Some(pos) => {
                self.abandoned.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Correlates outbound commands with inbound responses.
pub struct CommandGateway {
    state: AtomicLinkState,
    link: RwLock<Option<Link>>,
    table: Mutex<Correlation>,
    next_sequence_id: AtomicU8,
    next_link_id: AtomicU64,
    late_window: usize,
    sent: AtomicU64,
    discarded_late: AtomicU64,
}

impl CommandGateway {
    /// Create a gateway with no link attached.
    ///
    /// `late_window` is raised to 1 if zero; a response for the most
    /// recently abandoned exchange is always recognized as late.
    pub fn new(late_window: usize) -> Self {
        let late_window = late_window.max(1);
        Self {
            state: AtomicLinkState::new(),
            link: RwLock::new(None),
            table: Mutex::new(Correlation {
                last_transaction_id: 0,
                pending: HashMap::new(),
                abandoned: VecDeque::with_capacity(late_window),
            }),
            next_sequence_id: AtomicU8::new(0),
            next_link_id: AtomicU64::new(0),
            late_window,
            sent: AtomicU64::new(0),
            discarded_late: AtomicU64::new(0),
        }
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    /// True while a link is attached.
    pub fn is_initialized(&self) -> bool {
        self.state.get() == LinkState::Initialized
    }

    /// True while `link` is the attached link.
    pub fn is_current(&self, link: LinkId) -> bool {
        self.link.read().as_ref().is_some_and(|l| l.id == link)
    }

    /// Attach the outbound side of a link.
    pub fn attach(&self, writer: WriterHandle) -> Result<LinkId> {
        let mut slot = self.link.write();
        match self
            .state
            .transition(LinkState::Uninitialized, LinkState::Initialized)
        {
            Ok(()) => {
                let id = LinkId(self.next_link_id.fetch_add(1, Ordering::Relaxed) + 1);
                *slot = Some(Link { id, writer });
                tracing::info!(link = id.0, "modem link attached");
                Ok(id)
            }
            Err(LinkState::Initialized) => Err(AltcomError::AlreadyAttached),
            Err(_) => Err(AltcomError::NotInitialized),
        }
    }

    /// Drop whatever link is attached and fail every outstanding exchange.
    pub fn detach(&self) {
        let mut slot = self.link.write();
        let _ = self
            .state
            .transition(LinkState::Initialized, LinkState::Uninitialized);
        self.drop_link(&mut slot);
    }

    /// Detach `link` if it is still the attached one.
    ///
    /// Returns false, changing nothing, when another link has replaced it.
    pub fn detach_link(&self, link: LinkId) -> bool {
        let mut slot = self.link.write();
        if !slot.as_ref().is_some_and(|l| l.id == link) {
            tracing::debug!(link = link.0, "stale link already detached");
            return false;
        }
        let _ = self
            .state
            .transition(LinkState::Initialized, LinkState::Uninitialized);
        self.drop_link(&mut slot);
        true
    }

    /// Detach and refuse any further link.
    pub fn shutdown(&self) {
        let mut slot = self.link.write();
        self.state.set(LinkState::ShutDown);
        self.drop_link(&mut slot);
    }

    fn drop_link(&self, slot: &mut Option<Link>) {
        let link = slot.take().map(|l| l.id.0);
        let failed = {
            let mut table = self.table.lock();
            let n = table.pending.len();
            // Dropping the senders wakes every waiter with a link failure
            table.pending.clear();
            n
        };
        if link.is_some() || failed > 0 {
            tracing::info!(link, failed_exchanges = failed, "modem link detached");
        }
    }

    /// Send `command` and wait for the correlated response.
    ///
    /// `command` must hold a complete encoded frame; its sequence and
    /// transaction ids are overwritten. On success `response` holds the
    /// response header followed by at most `expected_capacity` payload bytes,
    /// and the number of payload bytes actually received is returned. The
    /// caller compares it against the size it expects before decoding.
    pub async fn send(
        &self,
        command: &mut PooledBuffer,
        response: &mut PooledBuffer,
        expected_capacity: usize,
        timeout: Timeout,
    ) -> std::result::Result<usize, GatewayError> {
        let (link, writer) = self
            .link
            .read()
            .as_ref()
            .map(|l| (l.id, l.writer.clone()))
            .ok_or(GatewayError::NotInitialized)?;

        if command.len() < HEADER_SIZE {
            return Err(GatewayError::TransportFailure(io::Error::new(
                io::ErrorKind::InvalidInput,
                "command frame shorter than header",
            )));
        }

        let sequence_id = self.next_sequence_id.fetch_add(1, Ordering::Relaxed);
        let (transaction_id, rx) = self.register()?;
        let mut guard = PendingGuard {
            gateway: self,
            transaction_id,
            armed: true,
        };

        // The link may have been swapped while the waiter was registered
        if !self.is_current(link) {
            return Err(GatewayError::link_closed());
        }

        Header::stamp_ids(command.bytes_mut(), sequence_id, transaction_id);
        let command_id = Header::decode(command).map_or(0, |h| h.command_id);
        tracing::debug!(
            command_id,
            transaction_id,
            sequence_id,
            len = command.len(),
            "sending command"
        );

        writer.send(OutboundFrame::copy_from(command)).await?;
        self.sent.fetch_add(1, Ordering::Relaxed);

        let received = match timeout {
            Timeout::Forever => rx.await,
            Timeout::After(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::warn!(command_id, transaction_id, timeout = ?limit, "command timed out");
                    return Err(GatewayError::Timeout(limit));
                }
            },
        };
        let frame = received.map_err(|_| GatewayError::link_closed())?;
        guard.disarm();

        let received_len = frame.payload.len();
        let copied = received_len.min(expected_capacity);
        response.clear();
        let out = response.bytes_mut();
        out.extend_from_slice(&frame.header.encode());
        out.extend_from_slice(&frame.payload[..copied]);

        tracing::debug!(command_id, transaction_id, received_len, "response received");
        Ok(received_len)
    }

    fn register(&self) -> std::result::Result<(u16, oneshot::Receiver<Frame>), GatewayError> {
        let mut table = self.table.lock();
        let id = table.allocate().ok_or_else(|| {
            GatewayError::TransportFailure(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no free transaction id",
            ))
        })?;
        let (tx, rx) = oneshot::channel();
        table.pending.insert(id, tx);
        Ok((id, rx))
    }

    fn abandon(&self, transaction_id: u16) {
        let mut table = self.table.lock();
        if table.pending.remove(&transaction_id).is_none() && !self.is_initialized() {
            return;
        }
        if table.abandoned.len() >= self.late_window {
            table.abandoned.pop_front();
        }
        table.abandoned.push_back(transaction_id);
    }

    /// Route a reassembled frame from the receive path.
    ///
    /// Returns `None` when the frame was delivered to a waiter or discarded
    /// as a late response, and hands the frame back when it belongs to no
    /// exchange (a notification). Error indications are always handed back.
    pub fn complete(&self, frame: Frame) -> Option<Frame> {
        let header = frame.header;
        if header.is_error_indication() || header.transaction_id == 0 {
            return Some(frame);
        }

        let waiter = {
            let mut table = self.table.lock();
            match table.pending.remove(&header.transaction_id) {
                Some(tx) => Some(tx),
                None if table.take_abandoned(header.transaction_id) => {
                    drop(table);
                    self.discard_late(&header);
                    return None;
                }
                None => None,
            }
        };

        match waiter {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    // Waiter timed out between lookup and delivery
                    self.discard_late(&header);
                }
                None
            }
            None => Some(frame),
        }
    }

    fn discard_late(&self, header: &Header) {
        self.discarded_late.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            command_id = header.command_id,
            transaction_id = header.transaction_id,
            "discarding late response"
        );
    }

    /// Current counters.
    pub fn stats(&self) -> GatewayStats {
        let table = self.table.lock();
        GatewayStats {
            pending: table.pending.len(),
            abandoned: table.abandoned.len(),
            sent: self.sent.load(Ordering::Relaxed),
            discarded_late: self.discarded_late.load(Ordering::Relaxed),
        }
    }
}

impl Default for CommandGateway {
    fn default() -> Self {
        Self::new(DEFAULT_LATE_WINDOW)
    }
}

impl std::fmt::Debug for CommandGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGateway")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Removes the waiter on every exit path that did not receive a response.
struct PendingGuard<'a> {
    gateway: &'a CommandGateway,
    transaction_id: u16,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.gateway.abandon(self.transaction_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPool, PoolConfig};
    use crate::protocol::{build_frame, command};
    use crate::writer::{spawn_writer_task, WriterConfig};
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn command_buffer(pool: &BufferPool) -> PooledBuffer {
        let mut buf = pool.acquire(HEADER_SIZE + 4).unwrap();
        buf.bytes_mut()
            .extend_from_slice(&build_frame(&Header::command(0x0311, 4), &[0, 0, 0, 7]));
        buf
    }

    fn inbound(command_id: u16, transaction_id: u16, payload: &[u8]) -> Frame {
        let header = Header::new(0, command_id, transaction_id, payload.len() as u16);
        Frame::new(header, Bytes::copy_from_slice(payload))
    }

    fn attached_with(gateway: CommandGateway) -> (Arc<CommandGateway>, DuplexStream) {
        let (client, server) = duplex(4096);
        let (writer, _task) = spawn_writer_task(client, &WriterConfig::default());
        let gateway = Arc::new(gateway);
        gateway.attach(writer).unwrap();
        (gateway, server)
    }

    fn attached() -> (Arc<CommandGateway>, DuplexStream) {
        attached_with(CommandGateway::default())
    }

    async fn read_header(link: &mut DuplexStream) -> Header {
        let mut buf = [0u8; HEADER_SIZE + 4];
        link.read_exact(&mut buf).await.unwrap();
        Header::decode(&buf).unwrap()
    }

    #[tokio::test]
    async fn test_send_without_link() {
        let pool = BufferPool::default();
        let gateway = CommandGateway::default();
        let mut cmd = command_buffer(&pool);
        let mut res = pool.acquire(HEADER_SIZE + 4).unwrap();

        let err = gateway
            .send(&mut cmd, &mut res, 4, Timeout::Forever)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotInitialized));
        assert_eq!(gateway.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_response_is_correlated() {
        let pool = BufferPool::default();
        let (gateway, mut link) = attached();

        let sender = {
            let gateway = gateway.clone();
            let pool = pool.clone();
            tokio::spawn(async move {
                let mut cmd = command_buffer(&pool);
                let mut res = pool.acquire(HEADER_SIZE + 4).unwrap();
                let n = gateway
                    .send(&mut cmd, &mut res, 4, Timeout::After(Duration::from_secs(5)))
                    .await
                    .unwrap();
                (n, res.as_slice().to_vec())
            })
        };

        let header = read_header(&mut link).await;
        assert_ne!(header.transaction_id, 0);
        assert_eq!(gateway.stats().pending, 1);

        // A frame for another transaction is not taken by the waiter
        let stray = inbound(0x0311, header.transaction_id.wrapping_add(1), &[0; 4]);
        assert!(gateway.complete(stray).is_some());

        let reply = inbound(0x0311, header.transaction_id, &[0, 0, 0, 0]);
        assert!(gateway.complete(reply).is_none());

        let (n, bytes) = sender.await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(&bytes[HEADER_SIZE..], &[0, 0, 0, 0]);
        assert_eq!(gateway.stats().pending, 0);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_response_needs_no_spare_buffer() {
        // Exactly the command/response pair fits in the pool
        let pool = BufferPool::new(&PoolConfig {
            max_buffers: 2,
            max_buffer_size: 64,
        });
        let (gateway, mut link) = attached();

        let sender = {
            let gateway = gateway.clone();
            let pool = pool.clone();
            tokio::spawn(async move {
                let mut cmd = command_buffer(&pool);
                let mut res = pool.acquire(HEADER_SIZE + 4).unwrap();
                gateway
                    .send(&mut cmd, &mut res, 4, Timeout::After(Duration::from_secs(5)))
                    .await
            })
        };

        let header = read_header(&mut link).await;
        assert_eq!(pool.stats().outstanding, 2);
        assert!(gateway
            .complete(inbound(0x0311, header.transaction_id, &[0, 0, 0, 9]))
            .is_none());

        assert_eq!(sender.await.unwrap().unwrap(), 4);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_timeout_then_late_frame_discarded() {
        let pool = BufferPool::default();
        let (gateway, mut link) = attached();

        let mut cmd = command_buffer(&pool);
        let mut res = pool.acquire(HEADER_SIZE + 4).unwrap();
        let err = gateway
            .send(&mut cmd, &mut res, 4, Timeout::After(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));

        let header = read_header(&mut link).await;
        let stats = gateway.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.abandoned, 1);

        let late = inbound(0x0311, header.transaction_id, &[0; 4]);
        assert!(gateway.complete(late).is_none());
        assert_eq!(gateway.stats().discarded_late, 1);
        assert_eq!(gateway.stats().abandoned, 0);
    }

    #[tokio::test]
    async fn test_zero_late_window_still_discards() {
        let pool = BufferPool::default();
        let (gateway, mut link) = attached_with(CommandGateway::new(0));

        let mut cmd = command_buffer(&pool);
        let mut res = pool.acquire(HEADER_SIZE + 4).unwrap();
        let err = gateway
            .send(&mut cmd, &mut res, 4, Timeout::After(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));

        let header = read_header(&mut link).await;
        let late = inbound(0x0311, header.transaction_id, &[0; 4]);
        assert!(gateway.complete(late).is_none());
        assert_eq!(gateway.stats().discarded_late, 1);
    }

    #[tokio::test]
    async fn test_detach_fails_waiters() {
        let pool = BufferPool::default();
        let (gateway, mut link) = attached();

        let waiter = {
            let gateway = gateway.clone();
            let pool = pool.clone();
            tokio::spawn(async move {
                let mut cmd = command_buffer(&pool);
                let mut res = pool.acquire(HEADER_SIZE + 4).unwrap();
                gateway.send(&mut cmd, &mut res, 4, Timeout::Forever).await
            })
        };

        read_header(&mut link).await;
        gateway.detach();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::TransportFailure(_)));
        assert!(!gateway.is_initialized());
        assert_eq!(gateway.state(), LinkState::Uninitialized);
    }

    #[tokio::test]
    async fn test_stale_link_cannot_detach_successor() {
        let gateway = CommandGateway::default();

        let (first, _first_peer) = duplex(64);
        let (writer, _task) = spawn_writer_task(first, &WriterConfig::default());
        let old = gateway.attach(writer).unwrap();
        assert!(gateway.detach_link(old));
        assert!(!gateway.is_current(old));

        let (second, _second_peer) = duplex(64);
        let (writer, _task) = spawn_writer_task(second, &WriterConfig::default());
        let new = gateway.attach(writer).unwrap();
        assert_ne!(old, new);

        assert!(!gateway.detach_link(old));
        assert!(gateway.is_initialized());
        assert!(gateway.is_current(new));

        assert!(gateway.detach_link(new));
        assert_eq!(gateway.state(), LinkState::Uninitialized);
    }

    #[tokio::test]
    async fn test_attach_twice_and_after_shutdown() {
        let (gateway, _link) = attached();
        let (client, _server) = duplex(64);
        let (writer, _task) = spawn_writer_task(client, &WriterConfig::default());

        assert!(matches!(
            gateway.attach(writer.clone()),
            Err(AltcomError::AlreadyAttached)
        ));

        gateway.shutdown();
        assert_eq!(gateway.state(), LinkState::ShutDown);
        assert!(matches!(
            gateway.attach(writer),
            Err(AltcomError::NotInitialized)
        ));
    }

    #[test]
    fn test_notifications_pass_through() {
        let gateway = CommandGateway::default();

        let errind = inbound(command::ERROR_INDICATION, 5, &[0; 8]);
        assert!(gateway.complete(errind).is_some());

        let unsolicited = inbound(0x0400, 0, &[]);
        assert!(gateway.complete(unsolicited).is_some());
    }

    #[test]
    fn test_transaction_ids_skip_taken() {
        let mut table = Correlation {
            last_transaction_id: u16::MAX - 1,
            pending: HashMap::new(),
            abandoned: VecDeque::from(vec![1]),
        };
        let (tx, _rx) = oneshot::channel();
        table.pending.insert(u16::MAX, tx);

        // MAX is pending, 0 is reserved, 1 is abandoned
        assert_eq!(table.allocate(), Some(2));
    }

    #[test]
    fn test_late_window_is_bounded() {
        let gateway = CommandGateway::new(2);
        for id in 1..=3 {
            gateway.abandon_for_test(id);
        }
        let table = gateway.table.lock();
        assert_eq!(table.abandoned, VecDeque::from(vec![2, 3]));
    }

    impl CommandGateway {
        fn abandon_for_test(&self, id: u16) {
            let (tx, _rx) = oneshot::channel();
            self.table.lock().pending.insert(id, tx);
            self.abandon(id);
        }
    }
}

//! Integration tests for altcom-rpc.
//!
//! A simulated modem sits on the far end of an in-memory duplex link and
//! answers (or ignores) the commands the session sends.

use std::time::Duration;

use altcom_rpc::codec::{ContextIdRequest, Operation, Payload, RemoteResult, ResultCode};
use altcom_rpc::error::errno;
use altcom_rpc::handler::ErrorIndication;
use altcom_rpc::ops::tls::{ConfigInit, SslConfig};
use altcom_rpc::ops::ContextKind;
use altcom_rpc::protocol::{build_frame, command, Header, InboundFrame, HEADER_SIZE};
use altcom_rpc::{Altcom, AltcomBuilder, AltcomError, ResultPolicy, Timeout};
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Response carrying a result code and the id the modem saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Echoed {
    code: i32,
    id: u32,
}

impl Payload for Echoed {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.code);
        buf.put_u32(self.id);
    }

    fn decode(mut buf: &[u8]) -> Self {
        Echoed {
            code: buf.get_i32(),
            id: buf.get_u32(),
        }
    }
}

impl RemoteResult for Echoed {
    fn result_code(&self) -> i32 {
        self.code
    }
}

struct Echo;

impl Operation for Echo {
    const NAME: &'static str = "echo";
    const COMMAND_ID: u16 = 0x0390;
    type Request = ContextIdRequest;
    type Response = Echoed;
}

/// Modem side of the link.
struct Modem {
    link: DuplexStream,
}

impl Modem {
    async fn read_command(&mut self) -> (Header, Vec<u8>) {
        let mut head = [0u8; HEADER_SIZE];
        self.link.read_exact(&mut head).await.unwrap();
        let header = Header::decode(&head).unwrap();
        let mut payload = vec![0u8; header.payload_length as usize];
        self.link.read_exact(&mut payload).await.unwrap();
        (header, payload)
    }

    async fn reply(&mut self, to: &Header, payload: &[u8]) {
        let header = Header::new(
            to.sequence_id,
            to.command_id,
            to.transaction_id,
            payload.len() as u16,
        );
        self.send(&header, payload).await;
    }

    async fn send(&mut self, header: &Header, payload: &[u8]) {
        self.link
            .write_all(&build_frame(header, payload))
            .await
            .unwrap();
    }

    async fn assert_silent(&mut self) {
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(50), self.link.read(&mut buf)).await;
        assert!(read.is_err(), "session wrote an unexpected frame");
    }
}

fn builder() -> AltcomBuilder {
    Altcom::builder().context_ids(|_kind: ContextKind| 7)
}

fn attach(builder: AltcomBuilder) -> (Altcom, Modem) {
    let altcom = builder.build();
    let (client, server) = duplex(8 * 1024);
    altcom.attach(client).unwrap();
    (altcom, Modem { link: server })
}

fn result_payload(code: i32) -> Vec<u8> {
    code.to_be_bytes().to_vec()
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn assert_buffers_balanced(altcom: &Altcom) {
    let stats = altcom.pool().stats();
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.acquired, stats.released);
}

/// Initialization with context id 7 succeeds and the handle keeps the id.
#[tokio::test]
async fn test_config_init_success() {
    let (altcom, mut modem) = attach(builder());

    let modem_task = tokio::spawn(async move {
        let (header, payload) = modem.read_command().await;
        assert_eq!(header.command_id, command::TLS_CONFIG_INIT);
        assert_ne!(header.transaction_id, 0);
        assert_eq!(payload, vec![0, 0, 0, 7]);
        modem.reply(&header, &result_payload(0)).await;
        modem
    });

    let mut conf = SslConfig::new();
    altcom.config_init(&mut conf).await.unwrap();
    assert_eq!(conf.id(), Some(7));

    let _modem = modem_task.await.unwrap();
    assert_buffers_balanced(&altcom);
    assert_eq!(altcom.gateway().stats().pending, 0);
}

/// A missing response times out, releases buffers and leaves no state.
/// The response that shows up afterwards is discarded.
#[tokio::test]
async fn test_config_init_timeout_then_late_response() {
    let (altcom, mut modem) = attach(builder().request_timeout(Timeout::After(Duration::from_millis(50))));

    let mut conf = SslConfig::new();
    let err = altcom.config_init(&mut conf).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.errno(), errno::ETIMEDOUT);
    assert_eq!(conf.id(), None);
    assert_buffers_balanced(&altcom);

    let (header, _) = modem.read_command().await;
    modem.reply(&header, &result_payload(0)).await;

    let gateway = altcom.gateway();
    eventually(|| gateway.stats().discarded_late == 1).await;
    assert_buffers_balanced(&altcom);
    assert!(altcom.is_initialized());
}

/// An error indication is handled on a job: logged, released, no reply.
#[tokio::test]
async fn test_error_indication_notification() {
    let (altcom, mut modem) = attach(builder());

    let mut payload = BytesMut::new();
    ErrorIndication {
        version: 1,
        sequence_id: 4,
        command_id: command::TLS_CONFIG_INIT,
        transaction_id: 9,
        data_length: 4,
    }
    .encode(&mut payload);
    let header = Header::new(0, command::ERROR_INDICATION, 0, payload.len() as u16);
    modem.send(&header, &payload).await;

    let pool = altcom.pool().clone();
    eventually(|| {
        let stats = pool.stats();
        stats.acquired == 1 && stats.outstanding == 0
    })
    .await;
    modem.assert_silent().await;
}

/// A response of 2 bytes for an 8-byte response type is rejected undecoded.
#[tokio::test]
async fn test_short_response_is_length_mismatch() {
    let (altcom, mut modem) = attach(builder());

    let modem_task = tokio::spawn(async move {
        let (header, _) = modem.read_command().await;
        modem.reply(&header, &[0, 0]).await;
        modem
    });

    let err = altcom
        .call::<Echo>(&ContextIdRequest { id: 1 })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AltcomError::LengthMismatch {
            expected: 8,
            actual: 2
        }
    ));
    assert_eq!(err.errno(), errno::EPROTO);

    let _modem = modem_task.await.unwrap();
    assert_buffers_balanced(&altcom);
}

#[tokio::test]
async fn test_remote_failure_code() {
    let (altcom, mut modem) = attach(builder());

    let modem_task = tokio::spawn(async move {
        let (header, _) = modem.read_command().await;
        modem.reply(&header, &result_payload(-3)).await;
        modem
    });

    let mut conf = SslConfig::new();
    let err = altcom.config_init(&mut conf).await.unwrap_err();
    assert!(matches!(err, AltcomError::RemoteFailure(-3)));
    assert_eq!(conf.id(), None);

    let _modem = modem_task.await.unwrap();
    assert_buffers_balanced(&altcom);
}

#[tokio::test]
async fn test_lenient_policy_logs_and_keeps_id() {
    let (altcom, mut modem) = attach(builder().result_policy(ResultPolicy::Lenient));

    let modem_task = tokio::spawn(async move {
        let (header, _) = modem.read_command().await;
        modem.reply(&header, &result_payload(-1)).await;
        modem
    });

    let mut conf = SslConfig::new();
    altcom.config_init(&mut conf).await.unwrap();
    assert_eq!(conf.id(), Some(7));

    let _modem = modem_task.await.unwrap();
    assert_buffers_balanced(&altcom);
}

/// Without a link the call fails before any buffer is taken.
#[tokio::test]
async fn test_not_initialized() {
    let altcom = builder().build();

    let mut conf = SslConfig::new();
    let err = altcom.config_init(&mut conf).await.unwrap_err();
    assert!(matches!(err, AltcomError::NotInitialized));
    assert_eq!(err.errno(), errno::ENETDOWN);

    let err = altcom
        .call::<Echo>(&ContextIdRequest { id: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, AltcomError::NotInitialized));
    assert_eq!(altcom.pool().stats().acquired, 0);

    // Lenient mode still reports a missing link
    let lenient = builder().result_policy(ResultPolicy::Lenient).build();
    assert!(matches!(
        lenient.config_init(&mut conf).await,
        Err(AltcomError::NotInitialized)
    ));
}

#[tokio::test]
async fn test_unsupported_event_is_released() {
    let (altcom, mut modem) = attach(builder());

    modem.send(&Header::new(0, 0x0777, 0, 3), b"abc").await;

    let pool = altcom.pool().clone();
    eventually(|| {
        let stats = pool.stats();
        stats.acquired == 1 && stats.outstanding == 0
    })
    .await;

    // The link keeps working
    let modem_task = tokio::spawn(async move {
        let (header, _) = modem.read_command().await;
        modem.reply(&header, &result_payload(0)).await;
        modem
    });
    let mut conf = SslConfig::new();
    altcom.config_init(&mut conf).await.unwrap();
    let _modem = modem_task.await.unwrap();
}

#[tokio::test]
async fn test_registered_notification_handler() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (altcom, mut modem) = attach(builder().notification(
        0x0410,
        "network_state",
        move |frame: InboundFrame| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(frame.payload().to_vec());
                frame.release();
            }
        },
    ));

    modem.send(&Header::new(0, 0x0410, 0, 2), &[1, 2]).await;

    assert_eq!(rx.recv().await, Some(vec![1, 2]));
    let pool = altcom.pool().clone();
    eventually(|| pool.stats().outstanding == 0).await;
}

/// Responses answered out of order still reach their own callers.
#[tokio::test]
async fn test_concurrent_calls_are_correlated() {
    let (altcom, mut modem) = attach(builder());

    let modem_task = tokio::spawn(async move {
        let mut commands = Vec::new();
        for _ in 0..3 {
            commands.push(modem.read_command().await);
        }
        for (header, payload) in commands.iter().rev() {
            let id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let mut reply = BytesMut::new();
            Echoed { code: 0, id: id * 10 }.encode(&mut reply);
            modem.reply(header, &reply).await;
        }
        modem
    });

    let calls: Vec<_> = (1..=3u32)
        .map(|id| {
            let altcom = altcom.clone();
            tokio::spawn(async move { altcom.call::<Echo>(&ContextIdRequest { id }).await })
        })
        .collect();

    for (i, call) in calls.into_iter().enumerate() {
        let response = call.await.unwrap().unwrap();
        assert_eq!(response.id, (i as u32 + 1) * 10);
    }

    let _modem = modem_task.await.unwrap();
    assert_buffers_balanced(&altcom);
}

#[tokio::test]
async fn test_link_loss_fails_pending_call() {
    let (altcom, mut modem) = attach(builder());

    let modem_task = tokio::spawn(async move {
        let _ = modem.read_command().await;
        drop(modem);
    });

    let err = altcom
        .call::<Echo>(&ContextIdRequest { id: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, AltcomError::TransportFailure(_)));
    assert_eq!(err.errno(), errno::EIO);

    modem_task.await.unwrap();
    assert_buffers_balanced(&altcom);
    eventually(|| !altcom.is_initialized()).await;
}

#[tokio::test]
async fn test_pool_exhaustion_is_allocation_failure() {
    let (altcom, mut modem) = attach(builder().max_buffers(1));

    let err = altcom
        .call::<Echo>(&ContextIdRequest { id: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, AltcomError::AllocationFailure(_)));
    assert_eq!(err.errno(), errno::ENOMEM);
    assert_buffers_balanced(&altcom);
    modem.assert_silent().await;
}

/// The command/response pair fills the pool; the reply still arrives.
#[tokio::test]
async fn test_response_delivered_with_pool_fully_held() {
    let (altcom, mut modem) = attach(builder().max_buffers(2));

    let modem_task = tokio::spawn(async move {
        let (header, _) = modem.read_command().await;
        modem.reply(&header, &result_payload(0)).await;
        modem
    });

    let response = altcom
        .call_with_timeout::<ConfigInit>(
            &ContextIdRequest { id: 7 },
            Timeout::After(Duration::from_millis(500)),
        )
        .await
        .unwrap();
    assert_eq!(response, ResultCode(0));

    let _modem = modem_task.await.unwrap();
    assert_buffers_balanced(&altcom);
}

/// Many callers in flight at once all get their answers.
#[tokio::test]
async fn test_many_concurrent_calls_all_answered() {
    const CALLS: u32 = 32;
    let (altcom, mut modem) = attach(builder());

    let modem_task = tokio::spawn(async move {
        let mut commands = Vec::new();
        for _ in 0..CALLS {
            commands.push(modem.read_command().await);
        }
        for (header, payload) in &commands {
            let id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let mut reply = BytesMut::new();
            Echoed { code: 0, id }.encode(&mut reply);
            modem.reply(header, &reply).await;
        }
        modem
    });

    let calls: Vec<_> = (1..=CALLS)
        .map(|id| {
            let altcom = altcom.clone();
            tokio::spawn(async move {
                altcom
                    .call_with_timeout::<Echo>(
                        &ContextIdRequest { id },
                        Timeout::After(Duration::from_secs(2)),
                    )
                    .await
            })
        })
        .collect();

    for (i, call) in calls.into_iter().enumerate() {
        let response = call.await.unwrap().unwrap();
        assert_eq!(response.id, i as u32 + 1);
    }

    let _modem = modem_task.await.unwrap();
    assert_buffers_balanced(&altcom);
    assert_eq!(altcom.gateway().stats().pending, 0);
}

#[tokio::test]
async fn test_explicit_timeout_overrides_default() {
    let (altcom, _modem) = attach(builder());

    let err = altcom
        .call_with_timeout::<Echo>(
            &ContextIdRequest { id: 1 },
            Timeout::After(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AltcomError::Timeout(d) if d == Duration::from_millis(20)));
    assert_buffers_balanced(&altcom);
}

#[test]
fn test_result_code_operation_descriptor() {
    let descriptor = ConfigInit::DESCRIPTOR;
    assert_eq!(descriptor.command_id, command::TLS_CONFIG_INIT);
    assert_eq!(descriptor.request_size, ContextIdRequest::SIZE);
    assert_eq!(descriptor.response_size, ResultCode::SIZE);
}

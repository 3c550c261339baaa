//! Loopback demo: a session talking to an in-process simulated modem.
//!
//! ```text
//! RUST_LOG=altcom_rpc=debug cargo run --example loopback
//! ```

use std::time::Duration;

use altcom_rpc::codec::Payload;
use altcom_rpc::handler::ErrorIndication;
use altcom_rpc::ops::tls::SslConfig;
use altcom_rpc::protocol::{build_frame, command, Header, HEADER_SIZE};
use altcom_rpc::{Altcom, Timeout};
use bytes::BytesMut;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing_subscriber::EnvFilter;

/// Answers every command with result code 0, then raises an error
/// indication for the last command it saw.
async fn modem(mut link: DuplexStream) -> std::io::Result<()> {
    let mut head = [0u8; HEADER_SIZE];
    let mut last = None;

    for _ in 0..2 {
        link.read_exact(&mut head).await?;
        let Some(header) = Header::decode(&head) else {
            break;
        };
        let mut payload = vec![0u8; header.payload_length as usize];
        link.read_exact(&mut payload).await?;

        let reply = Header::new(header.sequence_id, header.command_id, header.transaction_id, 4);
        link.write_all(&build_frame(&reply, &0i32.to_be_bytes())).await?;
        last = Some(header);
    }

    if let Some(header) = last {
        let mut payload = BytesMut::new();
        ErrorIndication::from(header).encode(&mut payload);
        let errind = Header::new(0, command::ERROR_INDICATION, 0, payload.len() as u16);
        link.write_all(&build_frame(&errind, &payload)).await?;
    }

    // Keep the link open long enough for the notification job to run
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

#[tokio::main]
async fn main() -> altcom_rpc::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("altcom_rpc=debug,loopback=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let (client, server) = duplex(4096);
    let modem_task = tokio::spawn(modem(server));

    let altcom = Altcom::builder()
        .request_timeout(Timeout::After(Duration::from_secs(2)))
        .build();
    altcom.attach(client)?;

    for _ in 0..2 {
        let mut conf = SslConfig::new();
        altcom.config_init(&mut conf).await?;
        tracing::info!(config_id = ?conf.id(), "TLS configuration ready");
    }

    if let Ok(Err(e)) = modem_task.await {
        tracing::warn!(error = %e, "simulated modem stopped");
    }

    tracing::info!(pool = ?altcom.pool().stats(), gateway = ?altcom.gateway().stats(), "done");
    altcom.shutdown();
    Ok(())
}
